//! Collaborators implemented in Rust on top of the host OS.

use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

use rand::{rngs::OsRng, RngCore};

use super::{PlatformResult, PrivilegedExecutionChannel, PrivilegedSession, SecureRandomSource};
use crate::error::PlatformError;

/// Reset-token source backed by the OS CSPRNG.
#[derive(Debug, Default)]
pub struct OsRandomSource;

impl OsRandomSource {
    /// Creates the source.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Native random source for hosts that have no secure source of their own.
#[uniffi::export]
#[must_use]
pub fn os_random_source() -> Arc<dyn SecureRandomSource> {
    Arc::new(OsRandomSource::new())
}

/// `su`-backed privileged channel for rooted devices.
#[uniffi::export]
#[must_use]
pub fn su_execution_channel() -> Arc<dyn PrivilegedExecutionChannel> {
    Arc::new(SuExecutionChannel::new())
}

impl SecureRandomSource for OsRandomSource {
    fn generate_token(&self, length: u32) -> PlatformResult<Vec<u8>> {
        let len = usize::try_from(length)
            .map_err(|_| PlatformError::Rejected(format!("token length {length}")))?;
        let mut token = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut token)
            .map_err(|err| PlatformError::Unavailable(format!("os rng: {err}")))?;
        Ok(token)
    }
}

/// Privileged channel that spawns `su` and feeds it commands on stdin.
///
/// On unrooted devices spawning fails and [`PlatformError::Unavailable`] is
/// returned.
#[derive(Debug)]
pub struct SuExecutionChannel {
    program: String,
}

impl SuExecutionChannel {
    /// Uses the `su` binary found on `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("su")
    }

    /// Uses `program` instead of `su`.
    #[must_use]
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SuExecutionChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivilegedExecutionChannel for SuExecutionChannel {
    fn open(&self) -> PlatformResult<Arc<dyn PrivilegedSession>> {
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| PlatformError::Unavailable(format!("{}: {err}", self.program)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PlatformError::Unavailable("no stdin on privileged shell".to_string()))?;

        Ok(Arc::new(SuSession {
            inner: Mutex::new(Some((child, stdin))),
        }))
    }
}

struct SuSession {
    inner: Mutex<Option<(Child, ChildStdin)>>,
}

impl PrivilegedSession for SuSession {
    fn write_command(&self, command: String) -> PlatformResult<()> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (_, stdin) = guard
            .as_mut()
            .ok_or_else(|| PlatformError::Rejected("session closed".to_string()))?;
        writeln!(stdin, "{command}").map_err(|err| PlatformError::Rejected(err.to_string()))
    }

    fn close(&self) -> PlatformResult<()> {
        let taken = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some((mut child, mut stdin)) = taken else {
            return Ok(());
        };
        let flushed = stdin.flush();
        drop(stdin);

        // Reap the shell in the background; completion is never awaited.
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        flushed.map_err(|err| PlatformError::Rejected(err.to_string()))
    }
}
