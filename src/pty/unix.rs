//! POSIX pseudo-terminal backend.
//!
//! Allocates a master/slave pty pair and forks. The child becomes a session
//! leader on the slave side and execs the target program; the parent keeps
//! the non-blocking master descriptor and drains it cooperatively from the
//! thread that owns the session. There is no reader thread on this path:
//! the only suspension point is "wait until the master is readable".

use std::ffi::CString;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, fork, ForkResult, Pid};
use tracing::debug;

use super::{PtyError, PtyEvent, PtySession, Result, SpawnSpec};

/// Exit status the child reports when exec fails.
const EXEC_FAILURE_STATUS: i32 = 127;

fn winsize(rows: u16, cols: u16) -> Winsize {
    Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

/// fork + pty backend. Single-threaded cooperative I/O.
#[derive(Default)]
pub struct UnixPty {
    master: Option<OwnedFd>,
    child: Option<Pid>,
    exit_code: Option<i32>,
    eof_sent: bool,
}

impl UnixPty {
    pub fn new() -> Self {
        Self::default()
    }

    /// The master descriptor, for readiness registration in a host event
    /// loop.
    pub fn master_fd(&self) -> Option<RawFd> {
        self.master.as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Block up to `timeout_ms` for output to become readable.
    pub fn wait_readable(&self, timeout_ms: u16) -> bool {
        let Some(master) = &self.master else {
            return false;
        };
        let mut fds = [PollFd::new(master.as_fd(), PollFlags::POLLIN)];
        matches!(poll(&mut fds, PollTimeout::from(timeout_ms)), Ok(n) if n > 0)
    }

    /// Non-blocking child reap; records the best-available exit status.
    fn reap(&mut self) {
        let Some(pid) = self.child else { return };
        match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                self.exit_code = Some(code);
                self.child = None;
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                // Shell convention for death-by-signal.
                self.exit_code = Some(128 + signal as i32);
                self.child = None;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(%err, "waitpid failed");
                self.child = None;
            }
        }
    }

    fn build_env(spec: &SpawnSpec) -> Vec<CString> {
        // Explicit entries override the inherited environment.
        let mut merged: Vec<(String, String)> = std::env::vars().collect();
        for entry in &spec.env {
            let (key, value) = match entry.split_once('=') {
                Some(pair) => pair,
                None => (entry.as_str(), ""),
            };
            merged.retain(|(k, _)| k != key);
            merged.push((key.to_string(), value.to_string()));
        }
        merged
            .into_iter()
            .filter_map(|(k, v)| CString::new(format!("{}={}", k, v)).ok())
            .collect()
    }
}

impl PtySession for UnixPty {
    fn start(&mut self, spec: &SpawnSpec, rows: u16, cols: u16) -> Result<()> {
        let pty = openpty(&winsize(rows, cols), None)
            .map_err(|e| PtyError::Allocate(e.to_string()))?;

        // Everything the child needs is prepared before forking.
        let program = CString::new(spec.program.as_str())
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        let mut argv = vec![program.clone()];
        for arg in &spec.args {
            argv.push(CString::new(arg.as_str()).map_err(|e| PtyError::Spawn(e.to_string()))?);
        }
        let envp = Self::build_env(spec);
        let working_dir = spec.working_dir.clone();

        let master_raw = pty.master.as_raw_fd();
        let slave_raw = pty.slave.as_raw_fd();

        match unsafe { fork() }.map_err(|e| PtyError::Spawn(e.to_string()))? {
            ForkResult::Child => {
                // In the child: slave pty becomes the controlling terminal
                // and stdio, then the process image is replaced.
                unsafe {
                    libc::close(master_raw);
                    libc::setsid();
                    libc::ioctl(slave_raw, libc::TIOCSCTTY as libc::c_ulong, 0);
                    libc::dup2(slave_raw, 0);
                    libc::dup2(slave_raw, 1);
                    libc::dup2(slave_raw, 2);
                    if slave_raw > 2 {
                        libc::close(slave_raw);
                    }
                }
                if !working_dir.as_os_str().is_empty() {
                    let _ = unistd::chdir(&working_dir);
                }
                let _ = unistd::execvpe(&program, &argv, &envp);
                unsafe { libc::_exit(EXEC_FAILURE_STATUS) };
            }
            ForkResult::Parent { child } => {
                drop(pty.slave);
                let nonblock = fcntl(pty.master.as_fd(), FcntlArg::F_GETFL).and_then(|flags| {
                    let flags = OFlag::from_bits_truncate(flags);
                    fcntl(
                        pty.master.as_fd(),
                        FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK),
                    )
                });
                if let Err(err) = nonblock {
                    debug!(%err, "failed to set master non-blocking");
                }
                self.master = Some(pty.master);
                self.child = Some(child);
                self.exit_code = None;
                self.eof_sent = false;
                debug!(pid = child.as_raw(), program = %spec.program, "child spawned");
                Ok(())
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        let Some(master) = &self.master else { return };
        let mut offset = 0;
        while offset < bytes.len() {
            match unistd::write(master.as_fd(), &bytes[offset..]) {
                Ok(0) => break,
                Ok(n) => offset += n,
                Err(Errno::EAGAIN) => {
                    // Fire-and-forget: no back-pressure channel exists.
                    debug!(dropped = bytes.len() - offset, "pty input buffer full");
                    break;
                }
                Err(Errno::EINTR) => {}
                Err(err) => {
                    debug!(%err, "pty write failed");
                    break;
                }
            }
        }
    }

    fn resize(&mut self, rows: u16, cols: u16) {
        let Some(master) = &self.master else { return };
        let ws = libc::winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let rc = unsafe {
            libc::ioctl(
                master.as_raw_fd(),
                libc::TIOCSWINSZ as libc::c_ulong,
                &ws as *const libc::winsize,
            )
        };
        if rc == -1 {
            debug!("TIOCSWINSZ failed");
        }
    }

    fn terminate(&mut self) {
        if let Some(pid) = self.child {
            let _ = kill(pid, Signal::SIGHUP);
            let deadline = Instant::now() + Duration::from_millis(250);
            loop {
                self.reap();
                if self.child.is_none() {
                    break;
                }
                if Instant::now() >= deadline {
                    // The child ignored SIGHUP; stop waiting politely.
                    let _ = kill(pid, Signal::SIGKILL);
                    match waitpid(pid, None) {
                        Ok(WaitStatus::Exited(_, code)) => self.exit_code = Some(code),
                        Ok(WaitStatus::Signaled(_, signal, _)) => {
                            self.exit_code = Some(128 + signal as i32);
                        }
                        _ => {}
                    }
                    self.child = None;
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        self.master = None;
        self.eof_sent = true;
    }

    fn is_running(&self) -> bool {
        match self.child {
            Some(pid) => kill(pid, None).is_ok(),
            None => false,
        }
    }

    fn poll_output(&mut self, events: &mut Vec<PtyEvent>) {
        if self.eof_sent || self.master.is_none() {
            return;
        }

        enum Readiness {
            Idle,
            Ready,
            Closed,
        }

        let mut buffer = [0u8; 4096];
        loop {
            let readiness = {
                let Some(master) = &self.master else { break };
                let mut fds = [PollFd::new(master.as_fd(), PollFlags::POLLIN)];
                match poll(&mut fds, PollTimeout::ZERO) {
                    Ok(0) => Readiness::Idle,
                    Ok(_) => Readiness::Ready,
                    Err(Errno::EINTR) => Readiness::Idle,
                    Err(_) => Readiness::Closed,
                }
            };
            match readiness {
                Readiness::Idle => break,
                Readiness::Ready => {}
                Readiness::Closed => {
                    self.finish(events);
                    return;
                }
            }

            let read_result = {
                let Some(master) = &self.master else { break };
                unistd::read(master.as_fd(), &mut buffer)
            };
            match read_result {
                Ok(0) => {
                    self.finish(events);
                    return;
                }
                Ok(n) => events.push(PtyEvent::Data(buffer[..n].to_vec())),
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => {}
                Err(err) => {
                    // EIO is the normal "slave side closed" signal.
                    if err != Errno::EIO {
                        debug!(%err, "pty read failed");
                    }
                    self.finish(events);
                    return;
                }
            }
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }
}

impl UnixPty {
    /// Output closed: reap the child and deliver the final Eof.
    ///
    /// The pty closes before the child becomes waitable, so a single
    /// WNOHANG here races the exit and loses the status. Retry until
    /// the status arrives; a child that keeps running with its tty
    /// closed is left for `terminate`.
    fn finish(&mut self, events: &mut Vec<PtyEvent>) {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            self.reap();
            if self.child.is_none() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        self.master = None;
        if !self.eof_sent {
            self.eof_sent = true;
            events.push(PtyEvent::Eof);
        }
    }
}

impl Drop for UnixPty {
    fn drop(&mut self) {
        self.terminate();
    }
}
