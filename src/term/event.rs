//! Change notifications emitted by the terminal state machine.
//!
//! Every mutation of the screen model is expressed as a [`ChangeEvent`] and
//! delivered to the observers registered on that instance. Observers are
//! per-instance boxed callbacks, so multiple independent sessions can run
//! side by side without shared state.

/// A property of the terminal that changed outside the cell grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Property {
    /// Window title set via OSC 0/1/2.
    Title(String),
    /// Cursor visibility toggled (DECTCEM).
    CursorVisible(bool),
    /// Cursor blink toggled (mode 12 / DECSCUSR).
    CursorBlink(bool),
}

/// A structured notification that some screen state changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Rows `first_row..=last_row` of the live grid need re-rendering.
    CellsDamaged { first_row: u16, last_row: u16 },
    /// The cursor moved (or its visibility changed along with a move).
    CursorMoved { row: u16, col: u16, visible: bool },
    /// A non-grid property changed.
    PropertyChanged(Property),
    /// BEL received.
    Bell,
    /// The top grid row was evicted into scrollback.
    LinePushedToScrollback,
    /// A scrollback line was re-materialized into the grid.
    LinePoppedFromScrollback,
}

/// Callback invoked for every [`ChangeEvent`].
pub type Observer = Box<dyn FnMut(&ChangeEvent)>;
