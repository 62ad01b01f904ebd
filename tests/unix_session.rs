//! End-to-end session tests against real child processes.

#![cfg(unix)]

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ptyterm::{Lifecycle, SpawnSpec, TerminalSession, Theme};

fn session(rows: u16, cols: u16) -> TerminalSession {
    TerminalSession::new(rows, cols, Theme::default(), 1000)
}

/// Pump the session until it stops or the deadline passes.
fn run_to_completion(session: &mut TerminalSession, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while session.is_running() && Instant::now() < deadline {
        session.wait_readable(50);
        session.process_output();
    }
}

fn screen_text(session: &TerminalSession) -> String {
    (0..session.term().rows())
        .map(|row| session.term().row_text(row))
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn printf_output_lands_on_screen() {
    let mut s = session(24, 80);
    let finished = Rc::new(Cell::new(None));
    let seen = finished.clone();
    s.on_finished(move |code| seen.set(Some(code)));

    assert!(s.start(&SpawnSpec::new("/bin/sh").arg("-c").arg("printf 'hello world'")));
    run_to_completion(&mut s, Duration::from_secs(10));

    assert_eq!(s.lifecycle(), Lifecycle::Stopped);
    assert_eq!(finished.get(), Some(0));
    assert!(screen_text(&s).contains("hello world"));
}

#[test]
fn exit_code_propagates() {
    let mut s = session(24, 80);
    assert!(s.start(&SpawnSpec::new("/bin/sh").arg("-c").arg("exit 42")));
    run_to_completion(&mut s, Duration::from_secs(10));
    assert_eq!(s.exit_code(), Some(42));
}

#[test]
fn interactive_shell_exits_on_command() {
    let mut s = session(24, 80);
    assert!(s.start(&SpawnSpec::new("/bin/sh")));

    // Give the shell a moment to come up, then ask it to leave.
    let deadline = Instant::now() + Duration::from_secs(10);
    s.write(b"exit 7\n");
    while s.is_running() && Instant::now() < deadline {
        s.wait_readable(50);
        s.process_output();
    }

    assert_eq!(s.lifecycle(), Lifecycle::Stopped);
    assert_eq!(s.exit_code(), Some(7));
}

#[test]
fn terminate_fires_finished_once() {
    let mut s = session(24, 80);
    let count = Rc::new(Cell::new(0));
    let seen = count.clone();
    s.on_finished(move |_| seen.set(seen.get() + 1));

    assert!(s.start(&SpawnSpec::new("/bin/sh").arg("-c").arg("sleep 30")));
    s.terminate();
    s.terminate();
    s.process_output();

    assert_eq!(s.lifecycle(), Lifecycle::Stopped);
    assert_eq!(count.get(), 1);
}

#[test]
fn env_entries_override_inherited() {
    let mut s = session(24, 80);
    let spec = SpawnSpec::new("/bin/sh")
        .arg("-c")
        .arg("printf \"%s\" \"$PTYTERM_MARKER\"")
        .env("PTYTERM_MARKER=present");
    assert!(s.start(&spec));
    run_to_completion(&mut s, Duration::from_secs(10));
    assert!(screen_text(&s).contains("present"));
}

#[test]
fn resize_reaches_child() {
    let mut s = session(24, 80);
    assert!(s.start(&SpawnSpec::new("/bin/sh").arg("-c").arg("sleep 0.2; stty size")));
    s.resize(30, 100);
    run_to_completion(&mut s, Duration::from_secs(10));
    assert!(screen_text(&s).contains("30 100"));
    assert_eq!(s.term().rows(), 30);
    assert_eq!(s.term().cols(), 100);
}

#[test]
fn spawn_failure_reports_exec_status() {
    let mut s = session(24, 80);
    // fork and openpty succeed; exec fails in the child, which exits 127.
    assert!(s.start(&SpawnSpec::new("/nonexistent/definitely-not-a-binary")));
    run_to_completion(&mut s, Duration::from_secs(10));
    assert_eq!(s.exit_code(), Some(127));
}

#[test]
fn output_beyond_screen_fills_scrollback() {
    let mut s = session(5, 40);
    assert!(s.start(
        &SpawnSpec::new("/bin/sh")
            .arg("-c")
            .arg("for i in $(seq 1 20); do echo line$i; done")
    ));
    run_to_completion(&mut s, Duration::from_secs(10));
    assert!(!s.term().scrollback().is_empty());
    assert!(screen_text(&s).contains("line20"));
}
