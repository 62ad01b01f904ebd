//! Windows pseudoconsole backend.
//!
//! ConPTY has no readiness notification: reading the output pipe blocks.
//! A dedicated reader thread therefore lives for the duration of each
//! session. Its sole job is producing byte buffers; they cross to the
//! owning thread over an mpsc channel, and no terminal state is ever
//! touched from the reader. Teardown closes the pseudoconsole and pipe
//! handles so the blocked read fails, joins the reader with a bounded
//! timeout, and force-terminates the child if it is still alive.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows::Win32::System::Console::{
    ClosePseudoConsole, CreatePseudoConsole, ResizePseudoConsole, COORD, HPCON,
};
use windows::Win32::System::Pipes::CreatePipe;
use windows::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetExitCodeProcess,
    InitializeProcThreadAttributeList, TerminateProcess, UpdateProcThreadAttribute,
    WaitForSingleObject, CREATE_UNICODE_ENVIRONMENT, EXTENDED_STARTUPINFO_PRESENT,
    LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION, STARTUPINFOEXW,
};
use windows::Win32::System::IO::CancelIoEx;

use super::{PtyError, PtyEvent, PtySession, Result, SpawnSpec};

const PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE: usize = 0x00020016;
/// GetExitCodeProcess sentinel for a live process.
const STILL_ACTIVE: u32 = 259;
/// How long teardown waits for the reader thread before detaching it.
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Quote one argument for a CreateProcessW command line.
fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }
    let mut quoted = String::from("\"");
    let mut backslashes = 0;
    for ch in arg.chars() {
        match ch {
            '\\' => backslashes += 1,
            '"' => {
                quoted.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                backslashes = 0;
                quoted.push('"');
            }
            _ => {
                quoted.extend(std::iter::repeat('\\').take(backslashes));
                backslashes = 0;
                quoted.push(ch);
            }
        }
    }
    quoted.extend(std::iter::repeat('\\').take(backslashes * 2));
    quoted.push('"');
    quoted
}

/// Merged environment block: inherited vars with the explicit entries
/// applied on top, UTF-16, double-NUL terminated.
fn environment_block(spec: &SpawnSpec) -> Vec<u16> {
    let mut merged: Vec<(String, String)> = std::env::vars().collect();
    for entry in &spec.env {
        let (key, value) = match entry.split_once('=') {
            Some(pair) => pair,
            None => (entry.as_str(), ""),
        };
        merged.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
        merged.push((key.to_string(), value.to_string()));
    }

    let mut block = Vec::new();
    for (key, value) in merged {
        block.extend(format!("{}={}", key, value).encode_utf16());
        block.push(0);
    }
    block.push(0);
    block
}

/// Exclusively owned ConPTY resources: pseudoconsole, pipe ends, child.
struct PtyHandle {
    hpc: HPCON,
    input_write: HANDLE,
    output_read: HANDLE,
    process: PROCESS_INFORMATION,
    closed: AtomicBool,
}

// The contained handles are used from the owning thread and the reader
// thread only in the ways the API allows concurrently.
unsafe impl Send for PtyHandle {}
unsafe impl Sync for PtyHandle {}

impl PtyHandle {
    fn open(spec: &SpawnSpec, rows: u16, cols: u16) -> Result<Self> {
        unsafe { Self::open_inner(spec, rows, cols) }
    }

    unsafe fn open_inner(spec: &SpawnSpec, rows: u16, cols: u16) -> Result<Self> {
        let mut pty_input_read = HANDLE::default();
        let mut pty_input_write = HANDLE::default();
        let mut pty_output_read = HANDLE::default();
        let mut pty_output_write = HANDLE::default();

        // Input pipe (we write, the pseudoconsole reads).
        CreatePipe(&mut pty_input_read, &mut pty_input_write, None, 0)
            .map_err(|e| PtyError::Allocate(e.to_string()))?;

        // Output pipe (the pseudoconsole writes, we read).
        if let Err(e) = CreatePipe(&mut pty_output_read, &mut pty_output_write, None, 0) {
            let _ = CloseHandle(pty_input_read);
            let _ = CloseHandle(pty_input_write);
            return Err(PtyError::Allocate(e.to_string()));
        }

        let size = COORD {
            X: cols as i16,
            Y: rows as i16,
        };
        let hpc = match CreatePseudoConsole(size, pty_input_read, pty_output_write, 0) {
            Ok(hpc) => hpc,
            Err(e) => {
                let _ = CloseHandle(pty_input_read);
                let _ = CloseHandle(pty_input_write);
                let _ = CloseHandle(pty_output_read);
                let _ = CloseHandle(pty_output_write);
                return Err(PtyError::Allocate(e.to_string()));
            }
        };

        // The pseudoconsole owns its ends now.
        let _ = CloseHandle(pty_input_read);
        let _ = CloseHandle(pty_output_write);

        let close_all = |hpc: HPCON| {
            ClosePseudoConsole(hpc);
            let _ = CloseHandle(pty_input_write);
            let _ = CloseHandle(pty_output_read);
        };

        // Attribute list attaching the pseudoconsole to the child.
        let mut attr_list_size: usize = 0;
        let _ = InitializeProcThreadAttributeList(
            LPPROC_THREAD_ATTRIBUTE_LIST::default(),
            1,
            0,
            &mut attr_list_size,
        );
        let mut attr_list_buffer = vec![0u8; attr_list_size];
        let attr_list = LPPROC_THREAD_ATTRIBUTE_LIST(attr_list_buffer.as_mut_ptr() as *mut _);

        if let Err(e) = InitializeProcThreadAttributeList(attr_list, 1, 0, &mut attr_list_size) {
            close_all(hpc);
            return Err(PtyError::Spawn(e.to_string()));
        }
        if let Err(e) = UpdateProcThreadAttribute(
            attr_list,
            0,
            PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
            Some(hpc.0 as *const _),
            std::mem::size_of::<HPCON>(),
            None,
            None,
        ) {
            DeleteProcThreadAttributeList(attr_list);
            close_all(hpc);
            return Err(PtyError::Spawn(e.to_string()));
        }

        let mut startup_info = STARTUPINFOEXW {
            StartupInfo: std::mem::zeroed(),
            lpAttributeList: attr_list,
        };
        startup_info.StartupInfo.cb = std::mem::size_of::<STARTUPINFOEXW>() as u32;

        let mut command_line = quote_arg(&spec.program);
        for arg in &spec.args {
            command_line.push(' ');
            command_line.push_str(&quote_arg(arg));
        }
        let mut cmd_wide = wide(&command_line);

        let cwd_wide;
        let cwd_ptr = if spec.working_dir.as_os_str().is_empty() {
            PCWSTR::null()
        } else {
            cwd_wide = wide(&spec.working_dir.to_string_lossy());
            PCWSTR(cwd_wide.as_ptr())
        };

        let env_block = environment_block(spec);

        let mut process_info = PROCESS_INFORMATION::default();
        let spawn = CreateProcessW(
            PCWSTR::null(),
            PWSTR(cmd_wide.as_mut_ptr()),
            None,
            None,
            false,
            EXTENDED_STARTUPINFO_PRESENT | CREATE_UNICODE_ENVIRONMENT,
            Some(env_block.as_ptr() as *const c_void),
            cwd_ptr,
            &startup_info.StartupInfo,
            &mut process_info,
        );
        DeleteProcThreadAttributeList(attr_list);

        if let Err(e) = spawn {
            close_all(hpc);
            return Err(PtyError::Spawn(e.to_string()));
        }

        Ok(Self {
            hpc,
            input_write: pty_input_write,
            output_read: pty_output_read,
            process: process_info,
            closed: AtomicBool::new(false),
        })
    }

    /// Blocking read from the output pipe, run on the reader thread.
    fn read_blocking(&self, buffer: &mut [u8]) -> std::io::Result<usize> {
        let mut read: u32 = 0;
        unsafe {
            ReadFile(self.output_read, Some(buffer), Some(&mut read), None)
                .map_err(|e| std::io::Error::from_raw_os_error(e.code().0))?;
        }
        Ok(read as usize)
    }

    fn write(&self, data: &[u8]) {
        let mut written: u32 = 0;
        let result = unsafe { WriteFile(self.input_write, Some(data), Some(&mut written), None) };
        if let Err(err) = result {
            debug!(%err, "pty write failed");
        }
    }

    fn resize(&self, rows: u16, cols: u16) {
        let size = COORD {
            X: cols as i16,
            Y: rows as i16,
        };
        if let Err(err) = unsafe { ResizePseudoConsole(self.hpc, size) } {
            debug!(%err, "pseudoconsole resize failed");
        }
    }

    fn is_alive(&self) -> bool {
        unsafe { WaitForSingleObject(self.process.hProcess, 0).0 != 0 }
    }

    fn exit_code(&self) -> Option<i32> {
        let mut code: u32 = 0;
        unsafe {
            if GetExitCodeProcess(self.process.hProcess, &mut code).is_ok()
                && code != STILL_ACTIVE
            {
                return Some(code as i32);
            }
        }
        None
    }

    fn cancel_io(&self) {
        unsafe {
            let _ = CancelIoEx(self.output_read, None);
        }
    }

    /// Close the pseudoconsole and pipe ends exactly once; a blocked
    /// reader fails its read and exits.
    fn close_io(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        unsafe {
            ClosePseudoConsole(self.hpc);
            let _ = CloseHandle(self.input_write);
            let _ = CloseHandle(self.output_read);
        }
    }

    fn kill(&self) {
        if self.is_alive() {
            unsafe {
                let _ = TerminateProcess(self.process.hProcess, 1);
                let _ = WaitForSingleObject(self.process.hProcess, 1000);
            }
        }
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        self.close_io();
        unsafe {
            let _ = CloseHandle(self.process.hProcess);
            let _ = CloseHandle(self.process.hThread);
        }
    }
}

/// ConPTY backend with a dedicated reader thread per session.
#[derive(Default)]
pub struct WindowsPty {
    handle: Option<Arc<PtyHandle>>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    rx: Option<Receiver<PtyEvent>>,
    exit_code: Option<i32>,
    eof_sent: bool,
}

impl WindowsPty {
    pub fn new() -> Self {
        Self::default()
    }

    fn join_reader(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        let deadline = Instant::now() + READER_JOIN_TIMEOUT;
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            // Do not block teardown on a stuck read; the thread owns
            // nothing that outlives the session.
            warn!("reader thread did not exit in time; detaching");
        }
    }
}

impl PtySession for WindowsPty {
    fn start(&mut self, spec: &SpawnSpec, rows: u16, cols: u16) -> Result<()> {
        let handle = Arc::new(PtyHandle::open(spec, rows, cols)?);
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel::<PtyEvent>();

        // The reader thread produces byte buffers and nothing else; all
        // terminal state stays on the owning thread.
        let reader_handle = handle.clone();
        let reader_running = running.clone();
        let reader = thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];
            loop {
                if !reader_running.load(Ordering::SeqCst) {
                    break;
                }
                match reader_handle.read_blocking(&mut buffer) {
                    Ok(0) => {
                        let _ = tx.send(PtyEvent::Eof);
                        break;
                    }
                    Ok(n) => {
                        if tx.send(PtyEvent::Data(buffer[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        // Closed handles or child exit both land here.
                        if reader_running.load(Ordering::SeqCst) {
                            let _ = tx.send(PtyEvent::Eof);
                        }
                        break;
                    }
                }
            }
        });

        self.handle = Some(handle);
        self.running = running;
        self.reader = Some(reader);
        self.rx = Some(rx);
        self.exit_code = None;
        self.eof_sent = false;
        debug!(program = %spec.program, "child spawned under pseudoconsole");
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) {
        if let Some(handle) = &self.handle {
            handle.write(bytes);
        }
    }

    fn resize(&mut self, rows: u16, cols: u16) {
        if let Some(handle) = &self.handle {
            handle.resize(rows, cols);
        }
    }

    fn terminate(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = &self.handle {
            handle.cancel_io();
            handle.close_io();
        }
        self.join_reader();
        if let Some(handle) = self.handle.take() {
            handle.kill();
            self.exit_code = self.exit_code.or(handle.exit_code());
        }
        self.rx = None;
        self.eof_sent = true;
    }

    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_alive())
    }

    fn poll_output(&mut self, events: &mut Vec<PtyEvent>) {
        if self.eof_sent {
            return;
        }
        let mut finished = false;
        if let Some(rx) = &self.rx {
            loop {
                match rx.try_recv() {
                    Ok(PtyEvent::Data(chunk)) => events.push(PtyEvent::Data(chunk)),
                    Ok(PtyEvent::Eof) => {
                        finished = true;
                        break;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        finished = true;
                        break;
                    }
                }
            }
        }
        if finished {
            self.running.store(false, Ordering::SeqCst);
            if let Some(handle) = &self.handle {
                self.exit_code = handle.exit_code();
            }
            self.eof_sent = true;
            events.push(PtyEvent::Eof);
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }
}

impl Drop for WindowsPty {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_arg() {
        assert_eq!(quote_arg("plain"), "plain");
        assert_eq!(quote_arg("has space"), "\"has space\"");
        assert_eq!(quote_arg(""), "\"\"");
    }

    #[test]
    fn test_environment_block_terminated() {
        let spec = SpawnSpec::new("cmd.exe").env("PTYTERM_TEST=1");
        let block = environment_block(&spec);
        assert_eq!(block.last(), Some(&0));
        // Entries are NUL separated; the override is present.
        let joined: String = block
            .split(|&c| c == 0)
            .map(|chunk| String::from_utf16_lossy(chunk))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(joined.contains("PTYTERM_TEST=1"));
    }

    #[test]
    fn test_spawn_cmd_and_collect_output() {
        let mut pty = WindowsPty::new();
        let spec = SpawnSpec::new("cmd.exe").arg("/c").arg("echo hello");
        pty.start(&spec, 24, 80).unwrap();

        let start = Instant::now();
        let mut data = Vec::new();
        let mut eof = false;
        while start.elapsed() < Duration::from_secs(10) && !eof {
            let mut events = Vec::new();
            pty.poll_output(&mut events);
            for event in events {
                match event {
                    PtyEvent::Data(chunk) => data.extend(chunk),
                    PtyEvent::Eof => eof = true,
                }
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(eof);
        assert!(String::from_utf8_lossy(&data).contains("hello"));
    }
}
