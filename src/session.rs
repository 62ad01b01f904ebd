//! Session lifecycle: one child process, one terminal model.
//!
//! `TerminalSession` owns a pty backend, the VT parser, and the screen
//! state, and enforces the lifecycle rules the backends do not: writes
//! before start are dropped, termination is idempotent, and the
//! finished notification fires exactly once no matter how the child
//! ends.

use tracing::{debug, info, warn};

use crate::input::{KeyAction, KeyEncoder, KeyInput};
use crate::pty::{NativePty, PtyEvent, PtySession, SpawnSpec};
use crate::term::parser::VtParser;
use crate::term::state::{TerminalState, Theme};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    NotStarted,
    Running,
    Stopped,
}

type FinishedCallback = Box<dyn FnMut(i32)>;

pub struct TerminalSession<P: PtySession = NativePty> {
    pty: P,
    parser: VtParser,
    term: TerminalState,
    lifecycle: Lifecycle,
    finished_fired: bool,
    on_finished: Vec<FinishedCallback>,
    pty_events: Vec<PtyEvent>,
    responses: Vec<crate::term::parser::Response>,
}

impl TerminalSession<NativePty> {
    pub fn new(rows: u16, cols: u16, theme: Theme, scrollback_capacity: usize) -> Self {
        Self::with_backend(NativePty::default(), rows, cols, theme, scrollback_capacity)
    }
}

impl<P: PtySession> TerminalSession<P> {
    pub fn with_backend(
        pty: P,
        rows: u16,
        cols: u16,
        theme: Theme,
        scrollback_capacity: usize,
    ) -> Self {
        Self {
            pty,
            parser: VtParser::new(),
            term: TerminalState::new(rows, cols, theme, scrollback_capacity),
            lifecycle: Lifecycle::NotStarted,
            finished_fired: false,
            on_finished: Vec::new(),
            pty_events: Vec::new(),
            responses: Vec::new(),
        }
    }

    /// Spawn the child. Returns false when the spawn fails; a failed
    /// start leaves the session stopped without firing finished.
    pub fn start(&mut self, spec: &SpawnSpec) -> bool {
        if self.lifecycle != Lifecycle::NotStarted {
            warn!("start called twice; ignoring");
            return self.lifecycle == Lifecycle::Running;
        }
        let rows = self.term.rows();
        let cols = self.term.cols();
        match self.pty.start(spec, rows, cols) {
            Ok(()) => {
                info!(program = %spec.program, rows, cols, "session started");
                self.lifecycle = Lifecycle::Running;
                true
            }
            Err(err) => {
                warn!(%err, program = %spec.program, "session start failed");
                self.lifecycle = Lifecycle::Stopped;
                false
            }
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.pty.exit_code()
    }

    pub fn term(&self) -> &TerminalState {
        &self.term
    }

    pub fn term_mut(&mut self) -> &mut TerminalState {
        &mut self.term
    }

    /// Register a callback invoked once with the child's exit code.
    pub fn on_finished(&mut self, callback: impl FnMut(i32) + 'static) {
        self.on_finished.push(Box::new(callback));
    }

    /// Raw bytes to the child. Dropped unless the session is running.
    pub fn write(&mut self, bytes: &[u8]) {
        if self.lifecycle != Lifecycle::Running {
            debug!(len = bytes.len(), "write outside running session dropped");
            return;
        }
        self.pty.write(bytes);
    }

    /// Encode a key against the current terminal modes and send it.
    /// Paste and Copy come back to the caller; the session does not
    /// own clipboard contents.
    pub fn send_key(&mut self, input: &KeyInput) -> KeyAction {
        let action = KeyEncoder::encode(input, &self.term.modes);
        if let KeyAction::Write(bytes) = &action {
            self.write(bytes);
        }
        action
    }

    /// Send pasted text to the child verbatim.
    pub fn paste(&mut self, text: &str) {
        let bytes = KeyEncoder::encode_paste(text);
        self.write(&bytes);
    }

    /// Resize the screen and the child's window together. Dimensions
    /// clamp to at least one row and one column.
    pub fn resize(&mut self, rows: u16, cols: u16) {
        let rows = rows.max(1);
        let cols = cols.max(1);
        self.term.resize(rows, cols);
        if self.lifecycle == Lifecycle::Running {
            self.pty.resize(rows, cols);
        }
    }

    /// Drain pending child output into the terminal state. Returns
    /// true when anything was consumed. Parser responses (DSR and
    /// friends) are written straight back to the child.
    pub fn process_output(&mut self) -> bool {
        if self.lifecycle != Lifecycle::Running {
            return false;
        }
        self.pty_events.clear();
        self.pty.poll_output(&mut self.pty_events);
        if self.pty_events.is_empty() {
            return false;
        }

        let mut saw_eof = false;
        let events = std::mem::take(&mut self.pty_events);
        for event in &events {
            match event {
                PtyEvent::Data(chunk) => {
                    self.responses.clear();
                    self.parser.advance(&mut self.term, chunk, &mut self.responses);
                    for response in self.responses.drain(..) {
                        self.pty.write(&response.to_bytes());
                    }
                }
                PtyEvent::Eof => saw_eof = true,
            }
        }
        self.pty_events = events;

        if saw_eof {
            self.finish();
        }
        true
    }

    /// Force the child down. Safe to call at any point, any number of
    /// times; finished still fires exactly once.
    pub fn terminate(&mut self) {
        if self.lifecycle == Lifecycle::Running {
            self.pty.terminate();
            self.finish();
        } else {
            self.pty.terminate();
        }
    }

    fn finish(&mut self) {
        self.lifecycle = Lifecycle::Stopped;
        if self.finished_fired {
            return;
        }
        self.finished_fired = true;
        let code = self.pty.exit_code().unwrap_or(0);
        info!(code, "session finished");
        let mut callbacks = std::mem::take(&mut self.on_finished);
        for callback in &mut callbacks {
            callback(code);
        }
        self.on_finished = callbacks;
    }
}

#[cfg(unix)]
impl TerminalSession<crate::pty::UnixPty> {
    /// Block until child output is likely readable or the timeout
    /// elapses. Lets callers avoid spinning on `process_output`.
    pub fn wait_readable(&self, timeout_ms: u16) -> bool {
        self.pty.wait_readable(timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell as StdCell;
    use std::rc::Rc;

    use super::*;
    use crate::pty::Result;

    #[derive(Default)]
    struct FakePty {
        started: bool,
        fail_start: bool,
        written: Vec<u8>,
        queued: Vec<PtyEvent>,
        terminated: u32,
        exit: Option<i32>,
        resizes: Vec<(u16, u16)>,
    }

    impl PtySession for FakePty {
        fn start(&mut self, _spec: &SpawnSpec, _rows: u16, _cols: u16) -> Result<()> {
            if self.fail_start {
                return Err(crate::pty::PtyError::Spawn("refused".into()));
            }
            self.started = true;
            Ok(())
        }

        fn write(&mut self, bytes: &[u8]) {
            self.written.extend_from_slice(bytes);
        }

        fn resize(&mut self, rows: u16, cols: u16) {
            self.resizes.push((rows, cols));
        }

        fn terminate(&mut self) {
            self.terminated += 1;
            self.exit.get_or_insert(0);
        }

        fn is_running(&self) -> bool {
            self.started && self.exit.is_none()
        }

        fn poll_output(&mut self, events: &mut Vec<PtyEvent>) {
            events.append(&mut self.queued);
        }

        fn exit_code(&self) -> Option<i32> {
            self.exit
        }
    }

    fn session(pty: FakePty) -> TerminalSession<FakePty> {
        TerminalSession::with_backend(pty, 24, 80, Theme::default(), 100)
    }

    #[test]
    fn test_write_before_start_is_dropped() {
        let mut s = session(FakePty::default());
        s.write(b"hello");
        s.start(&SpawnSpec::new("sh"));
        assert!(s.pty.written.is_empty());
    }

    #[test]
    fn test_failed_start_stops_without_finished() {
        let fired = Rc::new(StdCell::new(0));
        let count = fired.clone();
        let mut s = session(FakePty {
            fail_start: true,
            ..Default::default()
        });
        s.on_finished(move |_| count.set(count.get() + 1));
        assert!(!s.start(&SpawnSpec::new("nonexistent")));
        assert_eq!(s.lifecycle(), Lifecycle::Stopped);
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn test_output_feeds_terminal() {
        let mut s = session(FakePty::default());
        s.start(&SpawnSpec::new("sh"));
        s.pty.queued.push(PtyEvent::Data(b"abc".to_vec()));
        assert!(s.process_output());
        assert_eq!(s.term().row_text(0), "abc");
        assert!(!s.process_output());
    }

    #[test]
    fn test_eof_fires_finished_with_exit_code() {
        let fired = Rc::new(StdCell::new(-1));
        let seen = fired.clone();
        let mut s = session(FakePty::default());
        s.on_finished(move |code| seen.set(code));
        s.start(&SpawnSpec::new("sh"));
        s.pty.exit = Some(3);
        s.pty.queued.push(PtyEvent::Eof);
        s.process_output();
        assert_eq!(s.lifecycle(), Lifecycle::Stopped);
        assert_eq!(fired.get(), 3);
    }

    #[test]
    fn test_terminate_is_idempotent_and_fires_once() {
        let fired = Rc::new(StdCell::new(0));
        let count = fired.clone();
        let mut s = session(FakePty::default());
        s.on_finished(move |_| count.set(count.get() + 1));
        s.start(&SpawnSpec::new("sh"));
        s.terminate();
        s.terminate();
        assert_eq!(fired.get(), 1);
        assert_eq!(s.pty.terminated, 2);
    }

    #[test]
    fn test_resize_clamps_and_reaches_pty() {
        let mut s = session(FakePty::default());
        s.start(&SpawnSpec::new("sh"));
        s.resize(0, 0);
        assert_eq!(s.pty.resizes, vec![(1, 1)]);
        assert_eq!(s.term().grid().rows(), 1);
    }

    #[test]
    fn test_dsr_response_written_back() {
        let mut s = session(FakePty::default());
        s.start(&SpawnSpec::new("sh"));
        s.pty.queued.push(PtyEvent::Data(b"\x1b[6n".to_vec()));
        s.process_output();
        assert_eq!(s.pty.written, b"\x1b[1;1R");
    }
}
