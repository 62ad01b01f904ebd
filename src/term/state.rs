//! Terminal screen model.
//!
//! This module defines the cell grid, cursor, and the state machine half of
//! terminal emulation: every operation the escape-sequence decoder invokes
//! lives here, and every mutation is reported to registered observers as a
//! [`ChangeEvent`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthChar;

use super::event::{ChangeEvent, Observer, Property};
use super::scrollback::{ScrollbackLine, ScrollbackStore};

/// Color of a cell's foreground or background.
///
/// Indexed colors are resolved to RGB at write time, so a cell only ever
/// carries "default" or an explicit 24-bit value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Color {
    #[default]
    Default,
    Rgb(u8, u8, u8),
}

/// Resolve an xterm-256 palette index to RGB.
pub fn index_to_rgb(index: u8) -> (u8, u8, u8) {
    // 16 base colors, 6x6x6 cube, 24-step grayscale ramp.
    const BASE: [(u8, u8, u8); 16] = [
        (0x00, 0x00, 0x00),
        (0xCD, 0x00, 0x00),
        (0x00, 0xCD, 0x00),
        (0xCD, 0xCD, 0x00),
        (0x00, 0x00, 0xEE),
        (0xCD, 0x00, 0xCD),
        (0x00, 0xCD, 0xCD),
        (0xE5, 0xE5, 0xE5),
        (0x7F, 0x7F, 0x7F),
        (0xFF, 0x00, 0x00),
        (0x00, 0xFF, 0x00),
        (0xFF, 0xFF, 0x00),
        (0x5C, 0x5C, 0xFF),
        (0xFF, 0x00, 0xFF),
        (0x00, 0xFF, 0xFF),
        (0xFF, 0xFF, 0xFF),
    ];

    match index {
        0..=15 => BASE[index as usize],
        16..=231 => {
            let n = index - 16;
            let level = |v: u8| if v == 0 { 0 } else { 55 + v * 40 };
            (level(n / 36), level((n / 6) % 6), level(n % 6))
        }
        232..=255 => {
            let v = 8 + (index - 232) * 10;
            (v, v, v)
        }
    }
}

bitflags! {
    /// Cell attribute bitmask.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AttrFlags: u16 {
        const BOLD          = 0b0000_0001;
        const ITALIC        = 0b0000_0010;
        const UNDERLINE     = 0b0000_0100;
        const STRIKETHROUGH = 0b0000_1000;
        const INVERSE       = 0b0001_0000;
    }
}

/// Colors and attributes applied to newly written cells.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CellAttrs {
    pub fg: Color,
    pub bg: Color,
    pub flags: AttrFlags,
}

impl CellAttrs {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One character position: content, styling, and display width.
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    /// One codepoint, optionally followed by a combining mark.
    pub grapheme: String,
    /// Display width in columns: 1 or 2; 0 marks the trailing half of a
    /// wide glyph.
    pub width: u8,
    pub attrs: CellAttrs,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            grapheme: String::new(),
            width: 1,
            attrs: CellAttrs::default(),
        }
    }
}

impl Cell {
    pub fn from_char(ch: char) -> Self {
        Self {
            grapheme: ch.to_string(),
            width: ch.width().unwrap_or(1).max(1) as u8,
            attrs: CellAttrs::default(),
        }
    }

    pub fn clear(&mut self, attrs: &CellAttrs) {
        self.grapheme.clear();
        self.width = 1;
        self.attrs = *attrs;
    }

    fn continuation(attrs: &CellAttrs) -> Self {
        Self {
            grapheme: String::new(),
            width: 0,
            attrs: *attrs,
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.width == 0
    }

    /// Displayed text, a single space for empty cells.
    pub fn display(&self) -> &str {
        if self.grapheme.is_empty() {
            " "
        } else {
            &self.grapheme
        }
    }
}

/// A single grid row.
#[derive(Clone, Debug, PartialEq)]
pub struct GridRow {
    pub cells: Vec<Cell>,
    /// Set when the row soft-wrapped into the next one.
    pub wrapped: bool,
}

impl GridRow {
    fn new(cols: u16) -> Self {
        Self {
            cells: vec![Cell::default(); cols as usize],
            wrapped: false,
        }
    }

    fn resize(&mut self, cols: u16) {
        self.cells.resize(cols as usize, Cell::default());
    }

    fn clear(&mut self, attrs: &CellAttrs) {
        for cell in &mut self.cells {
            cell.clear(attrs);
        }
        self.wrapped = false;
    }

    fn detach(self) -> ScrollbackLine {
        ScrollbackLine {
            cells: self.cells,
            wrapped: self.wrapped,
        }
    }

    fn attach(line: ScrollbackLine, cols: u16) -> Self {
        let mut row = Self {
            cells: line.cells,
            wrapped: line.wrapped,
        };
        row.resize(cols);
        row
    }
}

/// The live cell matrix. Dimensions are always at least 1x1.
pub struct ScreenGrid {
    cols: u16,
    rows: u16,
    lines: Vec<GridRow>,
}

impl ScreenGrid {
    fn new(rows: u16, cols: u16) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        Self {
            cols,
            rows,
            lines: (0..rows).map(|_| GridRow::new(cols)).collect(),
        }
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn row(&self, row: u16) -> Option<&GridRow> {
        self.lines.get(row as usize)
    }

    pub fn cell(&self, row: u16, col: u16) -> Option<&Cell> {
        self.row(row).and_then(|r| r.cells.get(col as usize))
    }

    fn row_mut(&mut self, row: u16) -> &mut GridRow {
        &mut self.lines[row as usize]
    }
}

/// Cursor position and presentation.
#[derive(Clone, Debug)]
pub struct CursorState {
    pub row: u16,
    pub col: u16,
    pub visible: bool,
    pub blink: bool,
    saved: Option<SavedCursor>,
}

impl Default for CursorState {
    fn default() -> Self {
        Self {
            row: 0,
            col: 0,
            visible: true,
            blink: true,
            saved: None,
        }
    }
}

#[derive(Clone, Debug)]
struct SavedCursor {
    row: u16,
    col: u16,
    attrs: CellAttrs,
}

/// Decoder-visible terminal modes.
#[derive(Clone, Debug)]
pub struct TermModes {
    pub application_cursor: bool,
    pub auto_wrap: bool,
    pub insert_mode: bool,
    pub linefeed_newline: bool,
}

impl Default for TermModes {
    fn default() -> Self {
        Self {
            application_cursor: false,
            auto_wrap: true,
            insert_mode: false,
            linefeed_newline: false,
        }
    }
}

/// Default foreground/background supplied by the embedding application.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Theme {
    pub foreground: (u8, u8, u8),
    pub background: (u8, u8, u8),
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            foreground: (0xE5, 0xE5, 0xE5),
            background: (0x1E, 0x1E, 0x1E),
        }
    }
}

/// The terminal's screen, cursor, scrollback, and modes.
///
/// All mutation happens through the methods here, driven by the decoder on
/// the single thread that owns the session. Observers registered with
/// [`TerminalState::observe`] receive a [`ChangeEvent`] for each mutation.
pub struct TerminalState {
    grid: ScreenGrid,
    cursor: CursorState,
    pub current_attrs: CellAttrs,
    pub modes: TermModes,
    title: String,
    /// Scroll region (top, bottom), 0-indexed inclusive.
    scroll_region: (u16, u16),
    scrollback: ScrollbackStore,
    /// View offset into scrollback: 0 = live view.
    scroll_offset: usize,
    theme: Theme,
    observers: Vec<Observer>,
}

impl TerminalState {
    pub fn new(rows: u16, cols: u16, theme: Theme, scrollback_capacity: usize) -> Self {
        let grid = ScreenGrid::new(rows, cols);
        let bottom = grid.rows() - 1;
        Self {
            grid,
            cursor: CursorState::default(),
            current_attrs: CellAttrs::default(),
            modes: TermModes::default(),
            title: String::new(),
            scroll_region: (0, bottom),
            scrollback: ScrollbackStore::new(scrollback_capacity),
            scroll_offset: 0,
            theme,
            observers: Vec::new(),
        }
    }

    /// Register an observer; every subsequent mutation is delivered to it.
    pub fn observe(&mut self, observer: impl FnMut(&ChangeEvent) + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn emit(&mut self, event: ChangeEvent) {
        for observer in &mut self.observers {
            observer(&event);
        }
    }

    fn emit_damage(&mut self, first_row: u16, last_row: u16) {
        self.emit(ChangeEvent::CellsDamaged {
            first_row,
            last_row,
        });
    }

    fn emit_cursor(&mut self) {
        let (row, col, visible) = (self.cursor.row, self.cursor.col, self.cursor.visible);
        self.emit(ChangeEvent::CursorMoved { row, col, visible });
    }

    pub fn rows(&self) -> u16 {
        self.grid.rows()
    }

    pub fn cols(&self) -> u16 {
        self.grid.cols()
    }

    pub fn grid(&self) -> &ScreenGrid {
        &self.grid
    }

    pub fn cursor(&self) -> &CursorState {
        &self.cursor
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn scrollback(&self) -> &ScrollbackStore {
        &self.scrollback
    }

    /// Resolve a cell color against the theme defaults.
    pub fn resolve_color(&self, color: Color, foreground: bool) -> (u8, u8, u8) {
        match color {
            Color::Rgb(r, g, b) => (r, g, b),
            Color::Default if foreground => self.theme.foreground,
            Color::Default => self.theme.background,
        }
    }

    /// Print a character at the cursor, advancing by its display width.
    pub fn put_char(&mut self, ch: char) {
        let width = ch.width().unwrap_or(0) as u16;

        if width == 0 {
            // Combining mark: attach to the previously written cell.
            self.append_to_previous_cell(ch);
            return;
        }

        // Wrap once the cursor has moved past the right margin.
        if self.cursor.col >= self.cols() {
            if self.modes.auto_wrap {
                let row = self.cursor.row;
                self.grid.row_mut(row).wrapped = true;
                self.cursor.col = 0;
                self.linefeed();
            } else {
                self.cursor.col = self.cols() - 1;
            }
        }

        let (row, col) = (self.cursor.row, self.cursor.col);
        let cols = self.cols();
        if col >= cols {
            return;
        }

        self.repair_wide_overwrite(row, col);

        let attrs = self.current_attrs;
        let line = self.grid.row_mut(row);
        line.cells[col as usize] = Cell {
            grapheme: ch.to_string(),
            width: width as u8,
            attrs,
        };
        if width == 2 && col + 1 < cols {
            line.cells[col as usize + 1] = Cell::continuation(&attrs);
        }

        self.cursor.col += width;
        self.emit_damage(row, row);
        self.emit_cursor();
    }

    fn append_to_previous_cell(&mut self, ch: char) {
        let (row, col) = (self.cursor.row, self.cursor.col);
        if col > 0 {
            let line = self.grid.row_mut(row);
            let cell = &mut line.cells[col as usize - 1];
            // Keep at most base codepoint + one combining mark.
            if cell.grapheme.chars().count() < 2 {
                cell.grapheme.push(ch);
            }
            self.emit_damage(row, row);
        }
    }

    /// Overwriting half of a wide glyph blanks its other half.
    fn repair_wide_overwrite(&mut self, row: u16, col: u16) {
        let attrs = self.current_attrs;
        let cols = self.cols();
        let line = self.grid.row_mut(row);

        if col > 0 && line.cells[col as usize].is_continuation() {
            line.cells[col as usize - 1] = Cell {
                grapheme: " ".to_string(),
                width: 1,
                attrs,
            };
        }
        if line.cells[col as usize].width == 2 && col + 1 < cols {
            line.cells[col as usize + 1] = Cell {
                grapheme: " ".to_string(),
                width: 1,
                attrs,
            };
        }
    }

    pub fn carriage_return(&mut self) {
        self.cursor.col = 0;
        self.emit_cursor();
    }

    /// Move down one row, scrolling when at the bottom of the region.
    pub fn linefeed(&mut self) {
        if self.cursor.row >= self.scroll_region.1 {
            self.scroll_up(1);
        } else if self.cursor.row < self.rows() - 1 {
            self.cursor.row += 1;
        }
        self.emit_cursor();
    }

    pub fn backspace(&mut self) {
        if self.cursor.col > 0 {
            self.cursor.col -= 1;
            self.emit_cursor();
        }
    }

    pub fn horizontal_tab(&mut self) {
        // Tab stops every 8 columns.
        self.cursor.col = (((self.cursor.col / 8) + 1) * 8).min(self.cols() - 1);
        self.emit_cursor();
    }

    pub fn bell(&mut self) {
        self.emit(ChangeEvent::Bell);
    }

    /// Scroll the region up, evicting top rows into scrollback.
    pub fn scroll_up(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.cols();

        for _ in 0..n {
            if (bottom as usize) < self.grid.lines.len() {
                let removed = self.grid.lines.remove(top as usize);
                // Only rows leaving the real top of the screen are history.
                if top == 0 {
                    self.scrollback.push(removed.detach());
                    self.emit(ChangeEvent::LinePushedToScrollback);
                }
                self.grid
                    .lines
                    .insert(bottom as usize, GridRow::new(cols));
            }
        }
        self.emit_damage(top, bottom);
    }

    /// Scroll the region down, inserting blank rows at the top.
    pub fn scroll_down(&mut self, n: u16) {
        let (top, bottom) = self.scroll_region;
        let cols = self.cols();

        for _ in 0..n {
            if (bottom as usize) < self.grid.lines.len() {
                self.grid.lines.remove(bottom as usize);
                self.grid.lines.insert(top as usize, GridRow::new(cols));
            }
        }
        self.emit_damage(top, bottom);
    }

    pub fn cursor_up(&mut self, n: u16) {
        self.cursor.row = self.cursor.row.saturating_sub(n);
        self.emit_cursor();
    }

    pub fn cursor_down(&mut self, n: u16) {
        self.cursor.row = (self.cursor.row + n).min(self.rows() - 1);
        self.emit_cursor();
    }

    pub fn cursor_forward(&mut self, n: u16) {
        self.cursor.col = (self.cursor.col + n).min(self.cols() - 1);
        self.emit_cursor();
    }

    pub fn cursor_backward(&mut self, n: u16) {
        self.cursor.col = self.cursor.col.saturating_sub(n);
        self.emit_cursor();
    }

    /// Absolute cursor placement from 1-indexed parameters.
    pub fn cursor_position(&mut self, row: u16, col: u16) {
        self.cursor.row = row.saturating_sub(1).min(self.rows() - 1);
        self.cursor.col = col.saturating_sub(1).min(self.cols() - 1);
        self.emit_cursor();
    }

    /// CHA: 1-indexed column, row unchanged.
    pub fn cursor_column(&mut self, col: u16) {
        self.cursor.col = col.saturating_sub(1).min(self.cols() - 1);
        self.emit_cursor();
    }

    /// VPA: 1-indexed row, column unchanged.
    pub fn cursor_row(&mut self, row: u16) {
        self.cursor.row = row.saturating_sub(1).min(self.rows() - 1);
        self.emit_cursor();
    }

    pub fn erase_in_display(&mut self, mode: u16) {
        let attrs = self.current_attrs;
        let rows = self.rows();
        let cursor_row = self.cursor.row;
        match mode {
            0 => {
                self.erase_in_line(0);
                for r in (cursor_row + 1)..rows {
                    self.grid.row_mut(r).clear(&attrs);
                }
                self.emit_damage(cursor_row, rows - 1);
            }
            1 => {
                for r in 0..cursor_row {
                    self.grid.row_mut(r).clear(&attrs);
                }
                self.erase_in_line(1);
                self.emit_damage(0, cursor_row);
            }
            2 | 3 => {
                for r in 0..rows {
                    self.grid.row_mut(r).clear(&attrs);
                }
                self.emit_damage(0, rows - 1);
            }
            _ => {}
        }
    }

    pub fn erase_in_line(&mut self, mode: u16) {
        let (row, col) = (self.cursor.row, self.cursor.col as usize);
        let attrs = self.current_attrs;
        let line = self.grid.row_mut(row);
        let len = line.cells.len();

        match mode {
            0 => {
                for cell in &mut line.cells[col.min(len)..] {
                    cell.clear(&attrs);
                }
            }
            1 => {
                for cell in &mut line.cells[..(col + 1).min(len)] {
                    cell.clear(&attrs);
                }
            }
            2 => line.clear(&attrs),
            _ => return,
        }
        self.emit_damage(row, row);
    }

    pub fn insert_lines(&mut self, n: u16) {
        let row = self.cursor.row;
        let bottom = self.scroll_region.1;
        if row > bottom {
            return;
        }
        let cols = self.cols();
        for _ in 0..n {
            self.grid.lines.remove(bottom as usize);
            self.grid.lines.insert(row as usize, GridRow::new(cols));
        }
        self.emit_damage(row, bottom);
    }

    pub fn delete_lines(&mut self, n: u16) {
        let row = self.cursor.row;
        let bottom = self.scroll_region.1;
        if row > bottom {
            return;
        }
        let cols = self.cols();
        for _ in 0..n {
            self.grid.lines.remove(row as usize);
            self.grid.lines.insert(bottom as usize, GridRow::new(cols));
        }
        self.emit_damage(row, bottom);
    }

    pub fn insert_chars(&mut self, n: u16) {
        let (row, col) = (self.cursor.row, self.cursor.col as usize);
        let line = self.grid.row_mut(row);
        for _ in 0..n {
            if col < line.cells.len() {
                line.cells.pop();
                line.cells.insert(col, Cell::default());
            }
        }
        self.emit_damage(row, row);
    }

    pub fn delete_chars(&mut self, n: u16) {
        let (row, col) = (self.cursor.row, self.cursor.col as usize);
        let line = self.grid.row_mut(row);
        for _ in 0..n {
            if col < line.cells.len() {
                line.cells.remove(col);
                line.cells.push(Cell::default());
            }
        }
        self.emit_damage(row, row);
    }

    pub fn erase_chars(&mut self, n: u16) {
        let (row, col) = (self.cursor.row, self.cursor.col as usize);
        let attrs = self.current_attrs;
        let line = self.grid.row_mut(row);
        for i in 0..n as usize {
            if let Some(cell) = line.cells.get_mut(col + i) {
                cell.clear(&attrs);
            }
        }
        self.emit_damage(row, row);
    }

    /// DECSTBM; parameters are 1-indexed.
    pub fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let max = self.rows() - 1;
        let top = top.saturating_sub(1).min(max);
        let bottom = bottom.saturating_sub(1).min(max);
        if top < bottom {
            self.scroll_region = (top, bottom);
        }
    }

    pub fn save_cursor(&mut self) {
        self.cursor.saved = Some(SavedCursor {
            row: self.cursor.row,
            col: self.cursor.col,
            attrs: self.current_attrs,
        });
    }

    pub fn restore_cursor(&mut self) {
        if let Some(saved) = self.cursor.saved.clone() {
            self.cursor.row = saved.row.min(self.rows() - 1);
            self.cursor.col = saved.col.min(self.cols() - 1);
            self.current_attrs = saved.attrs;
            self.emit_cursor();
        }
    }

    pub fn set_title(&mut self, title: String) {
        self.title = title.clone();
        self.emit(ChangeEvent::PropertyChanged(Property::Title(title)));
    }

    pub fn set_cursor_visible(&mut self, visible: bool) {
        if self.cursor.visible != visible {
            self.cursor.visible = visible;
            self.emit(ChangeEvent::PropertyChanged(Property::CursorVisible(
                visible,
            )));
            self.emit_cursor();
        }
    }

    pub fn set_cursor_blink(&mut self, blink: bool) {
        if self.cursor.blink != blink {
            self.cursor.blink = blink;
            self.emit(ChangeEvent::PropertyChanged(Property::CursorBlink(blink)));
        }
    }

    /// RI: cursor up, scrolling down at the top of the region.
    pub fn reverse_index(&mut self) {
        if self.cursor.row == self.scroll_region.0 {
            self.scroll_down(1);
        } else {
            self.cursor_up(1);
        }
    }

    /// IND: same motion as linefeed.
    pub fn index(&mut self) {
        self.linefeed();
    }

    /// RIS: reset everything except theme, capacity, and observers.
    pub fn reset(&mut self) {
        let rows = self.rows();
        let cols = self.cols();
        self.grid = ScreenGrid::new(rows, cols);
        self.cursor = CursorState::default();
        self.current_attrs = CellAttrs::default();
        self.modes = TermModes::default();
        self.scroll_region = (0, rows - 1);
        self.scroll_offset = 0;
        self.emit_damage(0, rows - 1);
        self.emit_cursor();
    }

    /// Resize the grid in place, preserving overlapping content.
    ///
    /// Growing pulls lines back out of scrollback into the top of the grid;
    /// when the store runs dry, blank rows fill in at the bottom. Shrinking
    /// truncates the bottom. Values are clamped to at least 1.
    pub fn resize(&mut self, rows: u16, cols: u16) {
        let rows = rows.max(1);
        let cols = cols.max(1);

        for line in &mut self.grid.lines {
            line.resize(cols);
        }
        self.grid.cols = cols;

        let old_rows = self.grid.rows();
        if rows > old_rows {
            let mut needed = rows - old_rows;
            while needed > 0 {
                match self.scrollback.pop() {
                    Some(line) => {
                        self.grid.lines.insert(0, GridRow::attach(line, cols));
                        self.cursor.row += 1;
                        self.emit(ChangeEvent::LinePoppedFromScrollback);
                    }
                    None => {
                        self.grid.lines.push(GridRow::new(cols));
                    }
                }
                needed -= 1;
            }
        } else {
            self.grid.lines.truncate(rows as usize);
        }
        self.grid.rows = rows;

        self.cursor.row = self.cursor.row.min(rows - 1);
        self.cursor.col = self.cursor.col.min(cols - 1);
        self.scroll_region = (0, rows - 1);
        self.scroll_offset = self.scroll_offset.min(self.scrollback.len());

        self.emit_damage(0, rows - 1);
        self.emit_cursor();
    }

    // --- Read surface -----------------------------------------------------

    /// Scroll the view backward into history.
    pub fn scroll_view_up(&mut self, n: usize) {
        let max = self.scrollback.len();
        let offset = (self.scroll_offset + n).min(max);
        if offset != self.scroll_offset {
            self.scroll_offset = offset;
            let last = self.rows() - 1;
            self.emit_damage(0, last);
        }
    }

    /// Scroll the view back toward the live grid.
    pub fn scroll_view_down(&mut self, n: usize) {
        let offset = self.scroll_offset.saturating_sub(n);
        if offset != self.scroll_offset {
            self.scroll_offset = offset;
            let last = self.rows() - 1;
            self.emit_damage(0, last);
        }
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    /// Cells at a view row: scrolled-into-view history first, then the grid.
    pub fn view_line(&self, view_row: u16) -> Option<&[Cell]> {
        if self.scroll_offset == 0 {
            return self.grid.row(view_row).map(|r| r.cells.as_slice());
        }
        let start = self.scrollback.len() - self.scroll_offset;
        let absolute = start + view_row as usize;
        if absolute < self.scrollback.len() {
            self.scrollback.line(absolute).map(|l| l.cells.as_slice())
        } else {
            self.grid
                .row((absolute - self.scrollback.len()) as u16)
                .map(|r| r.cells.as_slice())
        }
    }

    pub fn view_cell(&self, view_row: u16, col: u16) -> Option<&Cell> {
        self.view_line(view_row).and_then(|c| c.get(col as usize))
    }

    /// Trimmed text content of a view row.
    pub fn row_text(&self, view_row: u16) -> String {
        let mut text = String::new();
        if let Some(cells) = self.view_line(view_row) {
            for cell in cells {
                if !cell.is_continuation() {
                    text.push_str(cell.display());
                }
            }
        }
        text.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(rows: u16, cols: u16) -> TerminalState {
        TerminalState::new(rows, cols, Theme::default(), 100)
    }

    fn type_str(t: &mut TerminalState, s: &str) {
        for ch in s.chars() {
            t.put_char(ch);
        }
    }

    #[test]
    fn test_dimensions_clamped() {
        let t = term(0, 0);
        assert_eq!(t.rows(), 1);
        assert_eq!(t.cols(), 1);
    }

    #[test]
    fn test_plain_text_advances_cursor() {
        let mut t = term(24, 80);
        type_str(&mut t, "hello");
        assert_eq!(t.cursor().col, 5);
        assert_eq!(t.cursor().row, 0);
        assert_eq!(t.row_text(0), "hello");
    }

    #[test]
    fn test_wrap_at_right_margin() {
        let mut t = term(24, 10);
        type_str(&mut t, "0123456789X");
        assert_eq!(t.cursor().row, 1);
        assert_eq!(t.cursor().col, 1);
        assert_eq!(t.row_text(0), "0123456789");
        assert_eq!(t.row_text(1), "X");
        assert!(t.grid().row(0).unwrap().wrapped);
    }

    #[test]
    fn test_scroll_pushes_top_row_to_scrollback() {
        let mut t = term(3, 10);
        let pushed = std::rc::Rc::new(std::cell::Cell::new(0usize));
        let counter = pushed.clone();
        t.observe(move |ev| {
            if matches!(ev, ChangeEvent::LinePushedToScrollback) {
                counter.set(counter.get() + 1);
            }
        });

        for i in 0..5 {
            type_str(&mut t, &format!("line{}", i));
            t.carriage_return();
            t.linefeed();
        }

        // 5 lines on a 3-row grid: the first 3 rows were evicted.
        assert_eq!(t.scrollback().len(), 3);
        assert_eq!(pushed.get(), 3);
        assert_eq!(t.row_text(0), "line3");
        assert_eq!(t.row_text(1), "line4");
    }

    #[test]
    fn test_wide_char_occupies_two_columns() {
        let mut t = term(5, 10);
        t.put_char('領');
        assert_eq!(t.cursor().col, 2);
        assert!(t.grid().cell(0, 1).unwrap().is_continuation());
    }

    #[test]
    fn test_resize_preserves_overlap() {
        let mut t = term(5, 20);
        type_str(&mut t, "keepme");
        t.resize(3, 10);
        assert_eq!(t.rows(), 3);
        assert_eq!(t.cols(), 10);
        assert_eq!(t.row_text(0), "keepme");

        t.resize(120, 200);
        assert_eq!(t.rows(), 120);
        assert_eq!(t.cols(), 200);
        assert_eq!(t.row_text(0), "keepme");
    }

    #[test]
    fn test_resize_grow_pops_from_scrollback() {
        let mut t = term(2, 10);
        for i in 0..4 {
            type_str(&mut t, &format!("l{}", i));
            t.carriage_return();
            t.linefeed();
        }
        let history = t.scrollback().len();
        assert!(history >= 2);

        t.resize(4, 10);
        assert_eq!(t.scrollback().len(), history - 2);
        // The most recently evicted lines are back on top, in order.
        assert_eq!(t.row_text(0), "l1");
        assert_eq!(t.row_text(1), "l2");
    }

    #[test]
    fn test_view_scrolls_into_history() {
        let mut t = term(2, 10);
        for i in 0..6 {
            type_str(&mut t, &format!("v{}", i));
            t.carriage_return();
            t.linefeed();
        }
        t.scroll_view_up(2);
        let top = t.row_text(0);
        t.scroll_view_down(2);
        assert_ne!(top, t.row_text(0));
        assert_eq!(t.scroll_offset(), 0);
    }

    #[test]
    fn test_erase_in_line() {
        let mut t = term(3, 10);
        type_str(&mut t, "abcdef");
        t.cursor_position(1, 3);
        t.erase_in_line(0);
        assert_eq!(t.row_text(0), "ab");
    }

    #[test]
    fn test_scroll_region_contains_scrolling() {
        let mut t = term(5, 10);
        t.set_scroll_region(2, 4);
        t.cursor_position(4, 1);
        type_str(&mut t, "bottom");
        t.linefeed();
        // Region scrolled internally; nothing was evicted to history.
        assert_eq!(t.scrollback().len(), 0);
    }

    #[test]
    fn test_title_event() {
        let mut t = term(2, 10);
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = seen.clone();
        t.observe(move |ev| sink.borrow_mut().push(ev.clone()));
        t.set_title("~/src: sh".to_string());
        assert_eq!(t.title(), "~/src: sh");
        assert!(seen.borrow().iter().any(|ev| matches!(
            ev,
            ChangeEvent::PropertyChanged(Property::Title(_))
        )));
    }

    #[test]
    fn test_color_resolution() {
        let t = term(2, 2);
        assert_eq!(t.resolve_color(Color::Rgb(1, 2, 3), true), (1, 2, 3));
        assert_eq!(
            t.resolve_color(Color::Default, true),
            Theme::default().foreground
        );
        assert_eq!(
            t.resolve_color(Color::Default, false),
            Theme::default().background
        );
    }

    #[test]
    fn test_palette_cube_and_gray() {
        assert_eq!(index_to_rgb(16), (0, 0, 0));
        assert_eq!(index_to_rgb(231), (255, 255, 255));
        assert_eq!(index_to_rgb(232), (8, 8, 8));
        assert_eq!(index_to_rgb(255), (238, 238, 238));
    }
}
