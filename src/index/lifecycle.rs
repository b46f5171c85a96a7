//! Trim loop lifecycle
//!
//! A dedicated thread runs one trim scan, then sleeps up to the trim interval
//! or until woken. Shutdown is two-phase:
//!
//! 1. `ShutdownSignal::shutdown()` cancels: the loop sees it between records
//!    or while idle
//! 2. the loop reports its `TrimExit` on a oneshot channel as its last act;
//!    `TrimRunner::stop()` joins the thread and then collects that exit
//!    without blocking, so it is safe to call from inside an async runtime
//!
//! `stop()` therefore never returns while a scan can still touch the store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;

use crate::error::{IndexError, IndexResult};
use crate::topology::FatalErrorHandler;

use super::trim::{ScanOutcome, TrimEngine};

/// Name of the trimmer thread
pub const TRIMMER_THREAD_NAME: &str = "cn-index-trimmer";

/// Interruptible shutdown signal for the trim loop.
///
/// `notify()` wakes an idle wait without requesting shutdown.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

#[derive(Default)]
struct SignalInner {
    flag: AtomicBool,
    woken: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake all waiters
    pub fn shutdown(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        let _guard = self.inner.mutex.lock();
        self.inner.condvar.notify_all();
    }

    /// Wake the idle loop early
    pub fn notify(&self) {
        self.inner.woken.store(true, Ordering::SeqCst);
        let _guard = self.inner.mutex.lock();
        self.inner.condvar.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Sleep for at most `duration`, returning early on `shutdown()` or
    /// `notify()`. Returns true if shutdown was requested.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let mut guard = self.inner.mutex.lock();
        if self.is_shutdown() || self.inner.woken.swap(false, Ordering::SeqCst) {
            return self.is_shutdown();
        }
        self.inner.condvar.wait_for(&mut guard, duration);
        self.inner.woken.store(false, Ordering::SeqCst);
        self.is_shutdown()
    }
}

/// Lifecycle of the trim loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

/// Why the trim loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrimExit {
    /// Shutdown was requested
    Shutdown,
    /// A scan failed; the message describes the storage error
    Failed(String),
}

#[derive(Default)]
struct Completion {
    done: Option<oneshot::Receiver<TrimExit>>,
    handle: Option<JoinHandle<()>>,
    exit: Option<TrimExit>,
}

/// Owner of the trimmer thread
pub struct TrimRunner {
    engine: Arc<TrimEngine>,
    state: Arc<Mutex<LifecycleState>>,
    completion: Mutex<Completion>,
}

impl TrimRunner {
    pub fn new(engine: Arc<TrimEngine>) -> Self {
        Self {
            engine,
            state: Arc::new(Mutex::new(LifecycleState::Created)),
            completion: Mutex::new(Completion::default()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Spawn the trim loop. Only valid from `Created`; later calls are no-ops.
    pub fn start(
        &self,
        interval: Duration,
        fatal: Arc<dyn FatalErrorHandler>,
    ) -> IndexResult<()> {
        let mut completion = self.completion.lock();
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::Created {
                return Ok(());
            }
            *state = LifecycleState::Running;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let engine = Arc::clone(&self.engine);
        let state = Arc::clone(&self.state);

        let spawned = std::thread::Builder::new()
            .name(TRIMMER_THREAD_NAME.into())
            .spawn(move || {
                tracing::info!(interval_ms = interval.as_millis() as u64, "trimmer started");
                let exit = run_loop(&engine, interval, fatal.as_ref());
                tracing::info!(?exit, "trimmer stopped");
                *state.lock() = LifecycleState::Stopped;
                // The receiver is gone only if the runner itself was dropped.
                let _ = done_tx.send(exit);
            });

        match spawned {
            Ok(handle) => {
                completion.done = Some(done_rx);
                completion.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn trimmer thread");
                *self.state.lock() = LifecycleState::Stopped;
                Err(IndexError::Spawn(e))
            }
        }
    }

    /// Wake the loop for an early scan
    pub fn wake(&self) {
        self.engine.signal().notify();
    }

    /// Stop the loop and wait until it has fully exited. Idempotent;
    /// concurrent callers all block until the first one finishes.
    ///
    /// Returns `None` when the loop never ran, or when called from the
    /// trimmer thread itself (a fatal handler), which exits on its own.
    pub fn stop(&self) -> Option<TrimExit> {
        let mut completion = self.completion.lock();
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Created => {
                    *state = LifecycleState::Stopped;
                    drop(state);
                    self.engine.signal().shutdown();
                    return None;
                }
                LifecycleState::Running => *state = LifecycleState::ShuttingDown,
                LifecycleState::ShuttingDown | LifecycleState::Stopped => {}
            }
        }
        self.engine.signal().shutdown();

        if let Some(handle) = completion.handle.take() {
            if handle.thread().id() == std::thread::current().id() {
                completion.handle = Some(handle);
                return None;
            }
            if handle.join().is_err() {
                tracing::error!("trimmer thread panicked");
            }
        }
        if let Some(mut done) = completion.done.take() {
            completion.exit = Some(
                done.try_recv()
                    .unwrap_or_else(|_| TrimExit::Failed("trimmer thread panicked".to_string())),
            );
        }
        *self.state.lock() = LifecycleState::Stopped;
        completion.exit.clone()
    }
}

impl Drop for TrimRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(engine: &TrimEngine, interval: Duration, fatal: &dyn FatalErrorHandler) -> TrimExit {
    let signal = engine.signal();
    loop {
        if signal.is_shutdown() {
            return TrimExit::Shutdown;
        }

        match engine.trim() {
            Ok(report) => {
                if report.deleted > 0 || report.outcome == ScanOutcome::BudgetSpent {
                    tracing::debug!(
                        deleted = report.deleted,
                        outcome = ?report.outcome,
                        "trim pass"
                    );
                }
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(error = %message, "trim failed; escalating");
                fatal.escalate(&IndexError::TrimFailed(e));
                return TrimExit::Failed(message);
            }
        }

        if signal.wait_timeout(interval) {
            return TrimExit::Shutdown;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::storage::{IndexStore, MemoryStore};
    use crate::topology::{NoopFatalHandler, StaticTopology};
    use crate::types::{ChangeRecord, ChangeToken, PartitionId, ReplicaId};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn engine() -> (Arc<TrimEngine>, IndexStore) {
        let store = IndexStore::new(Arc::new(MemoryStore::new()));
        let engine = TrimEngine::new(
            store.clone(),
            Arc::new(StaticTopology::new()),
            &IndexConfig::default(),
        );
        (Arc::new(engine), store)
    }

    #[test]
    fn test_wait_timeout_returns_immediately_when_shutdown() {
        let sig = ShutdownSignal::new();
        sig.shutdown();
        let start = Instant::now();
        assert!(sig.wait_timeout(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_notify_wakes_without_shutdown() {
        let sig = ShutdownSignal::new();
        let sig2 = sig.clone();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let result = sig2.wait_timeout(Duration::from_secs(10));
            (result, start.elapsed())
        });
        std::thread::sleep(Duration::from_millis(20));
        sig.notify();
        let (result, elapsed) = handle.join().unwrap();
        assert!(!result);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_timeout_expires_normally() {
        let sig = ShutdownSignal::new();
        let start = Instant::now();
        assert!(!sig.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_stop_before_start() {
        let (engine, _store) = engine();
        let runner = TrimRunner::new(engine);
        assert_eq!(runner.state(), LifecycleState::Created);
        assert_eq!(runner.stop(), None);
        assert_eq!(runner.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_start_then_stop_is_synchronous_and_idempotent() {
        let (engine, _store) = engine();
        let runner = TrimRunner::new(engine);
        runner
            .start(Duration::from_secs(60), Arc::new(NoopFatalHandler))
            .unwrap();
        assert_eq!(runner.state(), LifecycleState::Running);

        let start = Instant::now();
        assert_eq!(runner.stop(), Some(TrimExit::Shutdown));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(runner.state(), LifecycleState::Stopped);
        assert_eq!(runner.stop(), Some(TrimExit::Shutdown));
    }

    #[tokio::test]
    async fn test_stop_inside_async_runtime() {
        let (engine, _store) = engine();
        let runner = TrimRunner::new(engine);
        runner
            .start(Duration::from_secs(60), Arc::new(NoopFatalHandler))
            .unwrap();

        assert_eq!(runner.stop(), Some(TrimExit::Shutdown));
        assert_eq!(runner.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_stop_from_trimmer_thread_does_not_deadlock() {
        let (engine, store) = engine();
        store
            .append(&ChangeRecord::new(
                1,
                PartitionId::new("o=a"),
                ChangeToken::new(1, ReplicaId(1), 0),
                "",
            ))
            .unwrap();
        store.close().unwrap();

        let runner = Arc::new(TrimRunner::new(engine));
        let inner = Arc::downgrade(&runner);
        let handler = move |_: &IndexError| {
            if let Some(runner) = inner.upgrade() {
                assert_eq!(runner.stop(), None);
            }
        };
        runner
            .start(Duration::from_secs(60), Arc::new(handler))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while runner.state() != LifecycleState::Stopped && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(runner.stop(), Some(TrimExit::Failed(_))));
    }

    #[test]
    fn test_fatal_error_escalates_and_stops_loop() {
        let (engine, store) = engine();
        store
            .append(&ChangeRecord::new(
                1,
                PartitionId::new("o=a"),
                ChangeToken::new(1, ReplicaId(1), 0),
                "",
            ))
            .unwrap();
        store.close().unwrap();

        let escalations = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&escalations);
        let handler = move |e: &IndexError| {
            assert!(matches!(e, IndexError::TrimFailed(_)));
            seen.fetch_add(1, Ordering::SeqCst);
        };

        let runner = TrimRunner::new(engine);
        runner
            .start(Duration::from_secs(60), Arc::new(handler))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while runner.state() != LifecycleState::Stopped && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        match runner.stop() {
            Some(TrimExit::Failed(message)) => assert!(message.contains("closed")),
            other => panic!("unexpected exit: {:?}", other),
        }
        assert_eq!(escalations.load(Ordering::SeqCst), 1);
    }
}
