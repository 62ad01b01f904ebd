//! ptyterm - embeddable pseudo-terminal sessions with a screen model
//!
//! ptyterm spawns a child process under a pseudo-terminal (fork/openpty
//! on Unix, ConPTY on Windows), decodes the VT byte stream it produces,
//! and maintains the resulting screen: a grid of styled cells, a
//! cursor, and a capacity-bounded scrollback. Embedding applications
//! read the grid and render it however they like; nothing here draws.
//!
//! # Quick Start
//!
//! ```no_run
//! use ptyterm::{SpawnSpec, TerminalSession, Theme};
//!
//! let mut session = TerminalSession::new(24, 80, Theme::default(), 10_000);
//! session.start(&SpawnSpec::new("/bin/sh").env("TERM=xterm-256color"));
//! while session.is_running() {
//!     session.process_output();
//! }
//! println!("{}", session.term().row_text(0));
//! ```
//!
//! Key presses go through [`input::KeyEncoder`], which respects the
//! terminal modes the child has set (application cursor keys and so
//! on). Resizes apply to the screen and the child's window together.

pub mod config;
pub mod input;
pub mod pty;
pub mod session;
pub mod term;

pub use config::TerminalConfig;
pub use input::{Key, KeyAction, KeyEncoder, KeyInput, Modifiers};
pub use pty::{NativePty, PtyError, PtyEvent, PtySession, SpawnSpec};
pub use session::{Lifecycle, TerminalSession};
pub use term::{ChangeEvent, Property, TerminalState, Theme, VtParser};
