//! Pseudo-terminal backends.
//!
//! A [`PtySession`] gives a child process the illusion of a real terminal.
//! Two implementations exist, selected at compile time:
//!
//! - **unix**: pseudo-terminal allocation + fork, single-threaded
//!   cooperative I/O on a non-blocking master descriptor.
//! - **windows**: ConPTY + pipes, with a dedicated reader thread because
//!   the pipe read primitive blocks.
//!
//! Backends only move bytes. Terminal state lives in [`crate::term`] and is
//! mutated exclusively by the thread that owns the session.

use std::path::PathBuf;

use thiserror::Error;

#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use unix::UnixPty;
#[cfg(windows)]
pub use windows::WindowsPty;

/// The platform's backend.
#[cfg(unix)]
pub type NativePty = UnixPty;
#[cfg(windows)]
pub type NativePty = WindowsPty;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to allocate pseudo-terminal: {0}")]
    Allocate(String),

    #[error("failed to spawn process: {0}")]
    Spawn(String),

    #[error("failed to resize pseudo-terminal: {0}")]
    Resize(String),
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// How to launch the child process.
///
/// The environment entries are `KEY=VALUE` strings applied over the
/// inherited environment. Nothing is injected implicitly; callers wanting
/// `TERM=xterm-256color` or `COLORTERM=truecolor` list them here.
#[derive(Clone, Debug, Default)]
pub struct SpawnSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<String>,
}

impl SpawnSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }
}

/// Raw output produced by a backend.
#[derive(Debug, PartialEq, Eq)]
pub enum PtyEvent {
    /// A chunk of child output, in arrival order.
    Data(Vec<u8>),
    /// The output side closed: child exit, terminate, or a read error.
    Eof,
}

/// Capability set of a pseudo-terminal backend.
///
/// Lifecycle and the exactly-once `finished` notification are layered on
/// top by [`crate::session::TerminalSession`]; a backend just owns the OS
/// resources and moves bytes.
pub trait PtySession {
    /// Spawn the child attached to a fresh pty of the given size.
    ///
    /// On failure every handle opened so far is closed; no partial state
    /// is retained.
    fn start(&mut self, spec: &SpawnSpec, rows: u16, cols: u16) -> Result<()>;

    /// Forward bytes to the child's input. Fire-and-forget: never blocks,
    /// never reports back-pressure, silently dropped when not running.
    fn write(&mut self, bytes: &[u8]);

    /// Propagate new dimensions to the OS pty. Values already clamped to at least 1.
    fn resize(&mut self, rows: u16, cols: u16);

    /// End the child and release all OS resources. Idempotent.
    fn terminate(&mut self);

    fn is_running(&self) -> bool;

    /// Drain pending output without blocking. `Eof` is delivered at most
    /// once, after which no further events follow.
    fn poll_output(&mut self, events: &mut Vec<PtyEvent>);

    /// Exit code, once the child is gone. Defaults to 0 when the OS cannot
    /// report one.
    fn exit_code(&self) -> Option<i32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_spec_builder() {
        let spec = SpawnSpec::new("sh")
            .arg("-c")
            .arg("true")
            .working_dir("/tmp")
            .env("TERM=xterm-256color");
        assert_eq!(spec.program, "sh");
        assert_eq!(spec.args, vec!["-c", "true"]);
        assert_eq!(spec.working_dir, PathBuf::from("/tmp"));
        assert_eq!(spec.env, vec!["TERM=xterm-256color"]);
    }
}
