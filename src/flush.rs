//! When pending preference changes reach the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Controls when pending changes get written to the backing store.
#[non_exhaustive]
#[derive(Debug, Clone, Default)]
pub enum FlushPolicy {
    /// Only write when `flush()` or `sync()` is called (or at shutdown).
    #[default]
    Manual,
    /// Write after every put/remove. Safest, but most I/O.
    Immediate,
    /// Background thread writes on a timer and whenever a node changes.
    Async(Duration),
}

/// Thread that flushes a tree every interval and whenever a node changes.
/// Dropping the worker stops and joins it.
pub struct AsyncFlushWorker {
    stop: Arc<AtomicBool>,
    tx: Option<mpsc::SyncSender<()>>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl AsyncFlushWorker {
    /// Spawn a worker that runs `flush_fn` every `interval` and on
    /// [`trigger`](Self::trigger).
    pub fn start<F>(interval: Duration, flush_fn: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let (tx, rx) = mpsc::sync_channel::<()>(0);

        let join_handle = thread::Builder::new()
            .name("tree-prefs-flush".into())
            .spawn(move || loop {
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }
                match rx.recv_timeout(interval) {
                    Ok(()) | Err(mpsc::RecvTimeoutError::Timeout) => flush_fn(),
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|err| log::warn!("cannot spawn background flush thread: {err}"))
            .ok();

        Self {
            stop,
            tx: Some(tx),
            join_handle,
        }
    }

    /// Ask for a flush without waiting. Ignored while a flush is running;
    /// the next tick picks the change up.
    pub fn trigger(&self) {
        if let Some(ref t) = self.tx {
            let _ = t.try_send(());
        }
    }
}

impl Drop for AsyncFlushWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        drop(self.tx.take());
        if let Some(h) = self.join_handle.take() {
            let _ = h.join();
        }
    }
}

impl std::fmt::Debug for AsyncFlushWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFlushWorker")
            .field("running", &self.join_handle.is_some())
            .finish()
    }
}
