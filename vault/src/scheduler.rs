//! Debounced persistence.
//!
//! A save request either writes right away (zero delay) or opens a debounce
//! window. Requests arriving while a window is open replace the pending
//! snapshot and extend the window by one more delay, at most
//! [`MAX_EXTENSIONS`] times, so a steady stream of edits still gets flushed.
//! The write itself goes through [`Database::persist`], which holds the
//! database write gate.
//!
//! Every snapshot gets a sequence number when it is requested. Writes are
//! serialized through the scheduler and a snapshot older than the last one
//! written is dropped, so a window closing late never overwrites a newer
//! immediate save.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::{VaultError, VaultResult};
use crate::model::AccountRecord;
use crate::storage::Database;

pub const MAX_EXTENSIONS: u8 = 2;

#[derive(Debug, Default)]
struct Window {
    granted: u8,
    remaining: u8,
}

/// A requested snapshot and its request sequence number.
type Snapshot = (u64, Vec<AccountRecord>);

#[derive(Debug, Default)]
struct ScheduleState {
    next_seq: u64,
    pending: Option<Snapshot>,
    window: Option<Window>,
    tasks: Vec<JoinHandle<()>>,
}

enum WindowStep {
    Wait,
    Flush(Option<Snapshot>),
}

#[derive(Debug)]
struct Shared {
    database: Arc<Database>,
    state: Mutex<ScheduleState>,
    /// Sequence number of the last snapshot on disk; held for the whole write.
    written: Mutex<u64>,
    writes: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ScheduleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Called when a window delay elapses: either consume one extension or
    /// close the window and hand back the snapshot to write.
    fn next_step(&self) -> WindowStep {
        let mut state = self.state();
        if let Some(window) = state.window.as_mut() {
            if window.remaining > 0 {
                window.remaining -= 1;
                return WindowStep::Wait;
            }
        }
        state.window = None;
        WindowStep::Flush(state.pending.take())
    }

    fn write(&self, (seq, records): Snapshot) -> VaultResult<()> {
        let mut written = self.written.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if seq <= *written {
            log::debug!("skipping snapshot {seq}, snapshot {} is already on disk", *written);
            return Ok(());
        }
        match self.database.persist(&records) {
            Ok(()) => {
                *written = seq;
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => {
                drop(written);
                // Keep the snapshot for the next attempt unless a newer one arrived.
                let mut state = self.state();
                if state.pending.is_none() {
                    state.pending = Some((seq, records));
                }
                Err(err)
            }
        }
    }
}

async fn run_window(shared: Arc<Shared>, delay: Duration) {
    let pending = loop {
        tokio::time::sleep(delay).await;
        match shared.next_step() {
            WindowStep::Wait => log::debug!("save window extended"),
            WindowStep::Flush(pending) => break pending,
        }
    };

    let Some(snapshot) = pending else {
        return;
    };
    let writer = Arc::clone(&shared);
    match tokio::task::spawn_blocking(move || writer.write(snapshot)).await {
        Ok(Ok(())) => log::debug!("debounced save flushed"),
        Ok(Err(err)) => log::error!("debounced save failed, will retry on next request: {err}"),
        Err(err) => log::error!("debounced save task aborted: {err}"),
    }
}

/// Coalesces save requests into serialized writes of the latest snapshot.
#[derive(Debug, Clone)]
pub struct SaveScheduler {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl SaveScheduler {
    pub fn new(database: Arc<Database>, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                database,
                state: Mutex::new(ScheduleState::default()),
                written: Mutex::new(0),
                writes: AtomicU64::new(0),
            }),
            runtime,
        }
    }

    /// Schedules `snapshot` for persistence.
    ///
    /// With no window open, a zero delay writes on the calling thread and
    /// returns the outcome; a positive delay opens a window. With a window
    /// open, the snapshot replaces the pending one and the window may be
    /// extended.
    pub fn request_save(&self, snapshot: Vec<AccountRecord>, delay: Duration) -> VaultResult<()> {
        if !self.shared.database.has_key() {
            return Err(VaultError::KeyNotSet);
        }

        let mut state = self.shared.state();
        state.next_seq += 1;
        let seq = state.next_seq;
        state.pending = Some((seq, snapshot));

        if let Some(window) = state.window.as_mut() {
            if window.granted < MAX_EXTENSIONS {
                window.granted += 1;
                window.remaining += 1;
            }
            return Ok(());
        }

        if delay.is_zero() {
            let Some(pending) = state.pending.take() else {
                return Ok(());
            };
            drop(state);
            return match self.shared.write(pending) {
                Ok(()) => Ok(()),
                Err(err) => {
                    log::warn!("immediate save failed: {err}");
                    Err(err)
                }
            };
        }

        state.window = Some(Window::default());
        let task = self.runtime.spawn(run_window(Arc::clone(&self.shared), delay));
        state.tasks.retain(|task| !task.is_finished());
        state.tasks.push(task);
        log::debug!("save window opened ({} ms)", delay.as_millis());
        Ok(())
    }

    /// Waits for any open window to flush, then writes whatever is still
    /// pending (for example after a failed write). Used for the final flush.
    pub async fn flush(&self) -> VaultResult<()> {
        loop {
            let tasks = std::mem::take(&mut self.shared.state().tasks);
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(err) = task.await {
                    log::error!("save window task failed: {err}");
                }
            }
        }

        let pending = {
            let mut state = self.shared.state();
            if state.window.is_some() {
                None
            } else {
                state.pending.take()
            }
        };
        match pending {
            Some(snapshot) => {
                let shared = Arc::clone(&self.shared);
                tokio::task::spawn_blocking(move || shared.write(snapshot))
                    .await
                    .map_err(|err| VaultError::Io(std::io::Error::other(err.to_string())))?
            }
            None => Ok(()),
        }
    }

    pub fn has_pending(&self) -> bool {
        let state = self.shared.state();
        state.pending.is_some() || state.window.is_some()
    }

    /// Number of successful physical writes issued by this scheduler.
    pub fn write_count(&self) -> u64 {
        self.shared.writes.load(Ordering::SeqCst)
    }
}
