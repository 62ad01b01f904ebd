//! Terminal screen model: byte stream in, screen state out.
//!
//! `parser` decodes the VT byte stream, `state` holds the grid being
//! mutated, `scrollback` retains lines that scroll off the top, and
//! `event` carries change notifications to observers.

pub mod event;
pub mod parser;
pub mod scrollback;
pub mod state;

pub use event::{ChangeEvent, Observer, Property};
pub use parser::{Response, VtParser};
pub use scrollback::{ScrollbackLine, ScrollbackStore, DEFAULT_SCROLLBACK_CAPACITY};
pub use state::{
    AttrFlags, Cell, CellAttrs, Color, CursorState, ScreenGrid, TermModes, TerminalState, Theme,
};
