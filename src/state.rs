//! Process-global observation state, shared between the thread executing a
//! command and every other connection's status/abort threads.
//!
//! This is a single instance of
//! `{ in_progress, abort_requested, last_error }`, mutable only while a
//! command executes, observable by any thread. The
//! `in_progress`/`abort_requested` pair be "plain atomics; abort writes,
//! exposure reads" — so unlike the FITS-header store or filename sequencer
//! (which are owned outright by the observation-controller thread), this one
//! really does want lock-free shared access.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InProgress {
    Idle = 0,
    Multrun = 1,
    BiasDark = 2,
}

impl InProgress {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => InProgress::Multrun,
            2 => InProgress::BiasDark,
            _ => InProgress::Idle,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LastError {
    pub kind: crate::error::ErrorKind,
    pub message: String,
}

/// Shared process state. Cheap to clone (it's an `Arc` internally via
/// `Instrument`'s ownership, not here) and safe to read from any thread.
pub struct ProcessState {
    in_progress: AtomicU8,
    abort_requested: AtomicBool,
    shutdown_requested: AtomicBool,
    last_error: Mutex<Option<LastError>>,
}

impl Default for ProcessState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessState {
    pub fn new() -> Self {
        ProcessState {
            in_progress: AtomicU8::new(InProgress::Idle as u8),
            abort_requested: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// `shutdown`: sets a flag the server's accept loop polls
    /// between connections; it does not interrupt an in-progress
    /// observation.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn in_progress(&self) -> InProgress {
        InProgress::from_u8(self.in_progress.load(Ordering::SeqCst))
    }

    pub fn set_in_progress(&self, value: InProgress) {
        self.in_progress.store(value as u8, Ordering::SeqCst);
    }

    pub fn abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }

    pub fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
    }

    pub fn clear_abort(&self) {
        self.abort_requested.store(false, Ordering::SeqCst);
    }

    pub fn set_last_error(&self, kind: crate::error::ErrorKind, message: impl Into<String>) {
        *self.last_error.lock() = Some(LastError {
            kind,
            message: message.into(),
        });
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.last_error.lock().clone()
    }

    /// Begin a new observation: record which kind is starting and clear any
    /// stale abort flag.
    pub fn begin_observation(&self, kind: InProgress) -> crate::error::Result<()> {
        if self.in_progress() != InProgress::Idle {
            return Err(crate::error::Error::State(
                "an observation is already in progress".into(),
            ));
        }
        self.set_in_progress(kind);
        self.clear_abort();
        Ok(())
    }

    pub fn end_observation(&self) {
        self.set_in_progress(InProgress::Idle);
    }
}
