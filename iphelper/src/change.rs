use crate::abi::WAIT_TIMEOUT;
use crate::api::{ChangeKind, NotifyApi};
use crate::cancel::CancelToken;
use crate::error::{self, WaitFailure};
use crate::event::{PendingWait, SETTLE_TIMEOUT, WaitStatus};
use crate::notify;
use log::{debug, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// One record per wake. An `error` means the watcher of `kind` has stopped
/// for good; the other kind is not affected.
#[derive(Debug)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub error: Option<error::Error>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Armed,
    Closed,
}

struct State<A: NotifyApi> {
    phase: Phase,
    token: CancelToken,
    waits: [Option<Arc<PendingWait<A>>>; 2],
}

/// Subscription to address and/or route change notifications.
///
/// Each enabled kind gets its own worker that arms a registration, blocks
/// on the event on the blocking pool and pushes a [`ChangeEvent`] into a
/// queue of capacity one. [`ChangeNotify::reset`] and
/// [`ChangeNotify::close`] cancel the workers; a wake caused by the
/// cancellation is not reported.
pub struct ChangeNotify<A: NotifyApi> {
    api: Arc<A>,
    runtime: Handle,
    state: Mutex<State<A>>,
    tx: mpsc::Sender<ChangeEvent>,
    rx: tokio::sync::Mutex<mpsc::Receiver<ChangeEvent>>,
    workers: Arc<[AtomicUsize; 2]>,
}

#[cfg(target_os = "windows")]
impl ChangeNotify<crate::system::SystemApi> {
    pub fn new(address: bool, route: bool) -> error::Result<Self> {
        Self::with_api(crate::system::SystemApi::shared()?, address, route)
    }
}

impl<A: NotifyApi> ChangeNotify<A> {
    /// Must be called from within a tokio runtime; workers are spawned on it.
    pub fn with_api(api: Arc<A>, address: bool, route: bool) -> error::Result<Self> {
        let runtime = Handle::try_current()?;
        let (tx, rx) = mpsc::channel(1);

        let notify = Self {
            api,
            runtime,
            state: Mutex::new(State {
                phase: Phase::Idle,
                token: CancelToken::new(),
                waits: [None, None],
            }),
            tx,
            rx: tokio::sync::Mutex::new(rx),
            workers: Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]),
        };

        notify.reset(address, route)?;
        Ok(notify)
    }

    /// Drops the current waits and workers and starts over with the given
    /// kinds. On failure nothing is left armed.
    pub fn reset(&self, address: bool, route: bool) -> error::Result<()> {
        let mut state = self.lock();
        teardown(&*self.api, &mut state);

        let token = CancelToken::new();
        state.token = token.clone();
        state.phase = Phase::Idle;

        let mut waits: [Option<Arc<PendingWait<A>>>; 2] = [None, None];
        for (kind, wanted) in [(ChangeKind::Address, address), (ChangeKind::Route, route)] {
            if !wanted {
                continue;
            }

            match PendingWait::create(self.api.clone()) {
                Ok(wait) => waits[kind.index()] = Some(Arc::new(wait)),
                Err(err) => {
                    // waits created so far are released with `waits`
                    token.cancel();
                    warn!("Failed to watch {} changes: {}", kind, err);
                    return Err(err);
                }
            }
        }

        for kind in ChangeKind::ALL {
            let Some(wait) = &waits[kind.index()] else {
                continue;
            };

            let worker = Worker {
                api: self.api.clone(),
                kind,
                wait: wait.clone(),
                tx: self.tx.clone(),
                token: token.clone(),
                _live: Live::enter(&self.workers, kind),
            };
            self.runtime.spawn(worker.run());
        }

        if waits.iter().any(Option::is_some) {
            state.phase = Phase::Armed;
            info!("Watching changes (address: {}, route: {})", address, route);
        }
        state.waits = waits;

        Ok(())
    }

    /// Stops every worker and releases the events. Further calls are no-ops.
    pub fn close(&self) -> error::Result<()> {
        let mut state = self.lock();
        if state.phase == Phase::Closed {
            return Ok(());
        }

        teardown(&*self.api, &mut state);
        state.phase = Phase::Closed;
        info!("Change notifications closed");

        Ok(())
    }

    pub async fn recv(&self) -> Option<ChangeEvent> {
        self.rx.lock().await.recv().await
    }

    pub fn try_recv(&self) -> Option<ChangeEvent> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Resolves once the current arming is cancelled by `close` or `reset`.
    pub fn done(&self) -> impl Future<Output = ()> + Send + use<A> {
        self.lock().token.cancelled()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Number of live workers for `kind`, including ones still winding down.
    pub fn workers(&self, kind: ChangeKind) -> usize {
        self.workers[kind.index()].load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn token(&self) -> CancelToken {
        self.lock().token.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State<A>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<A: NotifyApi> Drop for ChangeNotify<A> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        teardown(&*self.api, state);
    }
}

// Cancel first so a worker that wakes from what follows sees it. A
// cancelled registration wakes its worker once the OS completes it; the
// event is only set by hand when nothing was outstanding.
fn teardown<A: NotifyApi>(api: &A, state: &mut State<A>) {
    state.token.cancel();

    for (kind, slot) in ChangeKind::ALL.into_iter().zip(state.waits.iter_mut()) {
        let Some(wait) = slot.take() else {
            continue;
        };

        if notify::cancel(api, &wait) {
            continue;
        }
        debug!("No pending {} registration to cancel", kind);
        if let Err(err) = wait.set() {
            debug!("Failed to wake {} watcher: {}", kind, err);
        }
        // the worker holds the other reference; the event closes when it exits
    }
}

struct Live {
    workers: Arc<[AtomicUsize; 2]>,
    kind: ChangeKind,
}

impl Live {
    fn enter(workers: &Arc<[AtomicUsize; 2]>, kind: ChangeKind) -> Self {
        workers[kind.index()].fetch_add(1, Ordering::SeqCst);
        Self {
            workers: workers.clone(),
            kind,
        }
    }
}

impl Drop for Live {
    fn drop(&mut self) {
        self.workers[self.kind.index()].fetch_sub(1, Ordering::SeqCst);
    }
}

struct Worker<A: NotifyApi> {
    api: Arc<A>,
    kind: ChangeKind,
    wait: Arc<PendingWait<A>>,
    tx: mpsc::Sender<ChangeEvent>,
    token: CancelToken,
    _live: Live,
}

impl<A: NotifyApi> Worker<A> {
    async fn run(self) {
        let kind = self.kind;
        debug!("{} watcher started", kind);

        loop {
            if self.token.is_cancelled() {
                break;
            }

            if let Err(err) = self.wait.reset() {
                debug!("Failed to clear {} event: {}", kind, err);
            }

            if let Err(err) = notify::arm(&*self.api, kind, &self.wait) {
                warn!("{}", err);
                self.push(Some(err)).await;
                break;
            }

            // cancelled between the check above and the registration
            if self.token.is_cancelled() {
                self.retire().await;
                break;
            }

            let wait = self.wait.clone();
            let woke = tokio::task::spawn_blocking(move || wait.wait(None)).await;

            if self.token.is_cancelled() {
                self.retire().await;
                break;
            }

            let failure = match woke {
                Ok(Ok(WaitStatus::Signaled)) => None,
                Ok(Ok(WaitStatus::TimedOut)) => Some(WaitFailure::Unexpected(WAIT_TIMEOUT)),
                Ok(Err(reason)) => Some(reason),
                Err(err) => Some(WaitFailure::Interrupted(err.to_string())),
            };

            let Some(reason) = failure else {
                debug!("{} changed", kind);
                if !self.push(None).await {
                    break;
                }
                continue;
            };

            let err = error::Error::Wait { kind, reason };
            warn!("{}", err);
            self.retire().await;
            self.push(Some(err)).await;
            break;
        }

        debug!("{} watcher stopped", kind);
    }

    /// Cancels whatever is still registered on the wait and holds on until
    /// the OS has let go of its overlapped record.
    async fn retire(&self) {
        notify::cancel(&*self.api, &self.wait);

        let wait = self.wait.clone();
        let settled = tokio::task::spawn_blocking(move || wait.settle(SETTLE_TIMEOUT)).await;
        if !matches!(settled, Ok(true)) {
            warn!("{} registration still outstanding after cancel", self.kind);
        }
    }

    /// Blocks while the queue is full; gives up when cancelled.
    async fn push(&self, error: Option<error::Error>) -> bool {
        if self.token.is_cancelled() {
            return false;
        }

        let event = ChangeEvent {
            kind: self.kind,
            error,
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }
}
