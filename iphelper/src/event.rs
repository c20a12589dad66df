use crate::abi::{
    INFINITE, Overlapped, RawHandle, STATUS_PENDING, WAIT_ABANDONED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use crate::api::NotifyApi;
use crate::error::{self, OsError, WaitFailure};
use log::{debug, warn};
use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How long a dropped wait gives a cancelled registration to complete.
pub(crate) const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE_POLL_MS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Signaled,
    TimedOut,
}

/// A waitable event together with the `OVERLAPPED` record the OS fills in
/// while a change registration is outstanding on it.
pub struct PendingWait<A: NotifyApi> {
    api: Arc<A>,
    event: RawHandle,
    // boxed so the address handed to the OS does not move
    overlapped: Box<UnsafeCell<Overlapped>>,
    closed: AtomicBool,
}

// The overlapped record is written by the OS and only read back through
// volatile loads; everything else is immutable or atomic.
unsafe impl<A: NotifyApi> Send for PendingWait<A> {}
unsafe impl<A: NotifyApi> Sync for PendingWait<A> {}

impl<A: NotifyApi> PendingWait<A> {
    pub fn create(api: Arc<A>) -> error::Result<Self> {
        let event = api.create_event().map_err(error::Error::EventCreation)?;
        let overlapped = Overlapped {
            h_event: event,
            ..Default::default()
        };

        Ok(Self {
            api,
            event,
            overlapped: Box::new(UnsafeCell::new(overlapped)),
            closed: AtomicBool::new(false),
        })
    }

    /// Blocks until the event is signalled. `None` waits forever.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<WaitStatus, WaitFailure> {
        if self.is_closed() {
            return Err(WaitFailure::Closed);
        }

        let millis = match timeout {
            Some(timeout) => timeout.as_millis().min(u128::from(INFINITE - 1)) as u32,
            None => INFINITE,
        };

        match self.api.wait_event(self.event, millis) {
            Ok(WAIT_OBJECT_0) => Ok(WaitStatus::Signaled),
            Ok(WAIT_TIMEOUT) => Ok(WaitStatus::TimedOut),
            Ok(WAIT_ABANDONED) => Err(WaitFailure::Abandoned),
            Ok(code) => Err(WaitFailure::Unexpected(code)),
            Err(err) => Err(WaitFailure::Failed(err)),
        }
    }

    pub fn set(&self) -> Result<(), OsError> {
        if self.is_closed() {
            return Ok(());
        }
        self.api.set_event(self.event)
    }

    pub fn reset(&self) -> Result<(), OsError> {
        if self.is_closed() {
            return Ok(());
        }
        self.api.reset_event(self.event)
    }

    /// True while a registration owns the overlapped record
    /// (`HasOverlappedIoCompleted` is false).
    pub fn in_flight(&self) -> bool {
        let record = self.overlapped();
        let internal = unsafe { std::ptr::read_volatile(&raw const (*record).internal) };
        internal == STATUS_PENDING
    }

    /// Blocks until the OS has completed the registration on this wait,
    /// normally or through cancellation. The event alone is not proof: it
    /// may have been set by hand. False if still in flight after `timeout`.
    pub fn settle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        while self.in_flight() {
            if Instant::now() >= deadline {
                return false;
            }

            let polled =
                (!self.is_closed()).then(|| self.api.wait_event(self.event, SETTLE_POLL_MS));
            if !matches!(polled, Some(Ok(WAIT_TIMEOUT))) {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        true
    }

    /// Releases the event. Safe to call any number of times.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Err(err) = self.api.close_event(self.event) {
            debug!("Failed to close event {:#x}: {}", self.event, err);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> RawHandle {
        self.event
    }

    pub(crate) fn overlapped(&self) -> *mut Overlapped {
        self.overlapped.get()
    }
}

impl<A: NotifyApi> Drop for PendingWait<A> {
    fn drop(&mut self) {
        if self.in_flight() {
            unsafe { self.api.cancel_change_notify(self.overlapped()) };

            if !self.settle(SETTLE_TIMEOUT) {
                warn!(
                    "Registration on event {:#x} never completed, leaking it",
                    self.event
                );
                // the OS still owns both the record and the event
                let overlapped = std::mem::take(&mut self.overlapped);
                std::mem::forget(overlapped);
                return;
            }
        }

        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ERROR_NOT_ENOUGH_MEMORY;
    use crate::api::ChangeKind;
    use crate::notify;
    use crate::testing::FakeApi;

    #[test]
    fn wait_times_out_then_signals() {
        let api = Arc::new(FakeApi::new());
        let wait = PendingWait::create(api.clone()).unwrap();
        assert_eq!(api.live_events(), 1);

        let status = wait.wait(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(status, WaitStatus::TimedOut);

        wait.set().unwrap();
        assert_eq!(wait.wait(None).unwrap(), WaitStatus::Signaled);
        // manual reset: stays signalled until reset
        assert_eq!(wait.wait(Some(Duration::ZERO)).unwrap(), WaitStatus::Signaled);

        wait.reset().unwrap();
        let status = wait.wait(Some(Duration::ZERO)).unwrap();
        assert_eq!(status, WaitStatus::TimedOut);
    }

    #[test]
    fn wakes_waiter_on_other_thread() {
        let api = Arc::new(FakeApi::new());
        let wait = Arc::new(PendingWait::create(api).unwrap());

        let waiter = {
            let wait = wait.clone();
            std::thread::spawn(move || wait.wait(None))
        };

        std::thread::sleep(Duration::from_millis(20));
        wait.set().unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(WaitStatus::Signaled));
    }

    #[test]
    fn close_is_idempotent() {
        let api = Arc::new(FakeApi::new());
        let wait = PendingWait::create(api.clone()).unwrap();

        wait.close();
        wait.close();
        assert!(wait.is_closed());
        assert_eq!(api.live_events(), 0);
        assert_eq!(api.close_calls(), 1);

        assert_eq!(wait.wait(None), Err(WaitFailure::Closed));
        assert!(wait.set().is_ok());

        drop(wait);
        assert_eq!(api.close_calls(), 1);
    }

    #[test]
    fn drop_releases_event() {
        let api = Arc::new(FakeApi::new());
        let wait = PendingWait::create(api.clone()).unwrap();
        assert_eq!(api.live_events(), 1);
        drop(wait);
        assert_eq!(api.live_events(), 0);
    }

    #[test]
    fn drop_waits_for_cancelled_registration() {
        let api = Arc::new(FakeApi::new());
        let wait = PendingWait::create(api.clone()).unwrap();
        notify::arm(&*api, ChangeKind::Route, &wait).unwrap();
        assert!(wait.in_flight());

        api.defer_cancellation();
        // a hand-set event must not count as completion
        wait.set().unwrap();
        let dropping = std::thread::spawn(move || drop(wait));

        std::thread::sleep(Duration::from_millis(50));
        assert!(!dropping.is_finished());
        assert_eq!(api.live_events(), 1);
        assert_eq!(api.cancel_calls(), 1);

        assert_eq!(api.complete_cancelled(), 1);
        dropping.join().unwrap();
        assert_eq!(api.live_events(), 0);
    }

    #[test]
    fn settle_after_completion() {
        let api = Arc::new(FakeApi::new());
        let wait = PendingWait::create(api.clone()).unwrap();
        assert!(!wait.in_flight());
        assert!(wait.settle(Duration::ZERO));

        notify::arm(&*api, ChangeKind::Address, &wait).unwrap();
        assert!(!wait.settle(Duration::from_millis(20)));

        api.fire(ChangeKind::Address);
        assert!(!wait.in_flight());
        assert!(wait.settle(Duration::ZERO));
    }

    #[test]
    fn abandoned_wait_is_an_error() {
        let api = Arc::new(FakeApi::new());
        let wait = PendingWait::create(api.clone()).unwrap();
        api.abandon(wait.handle());
        assert_eq!(wait.wait(None), Err(WaitFailure::Abandoned));
    }

    #[test]
    fn creation_failure() {
        let api = Arc::new(FakeApi::new());
        api.fail_next_create(ERROR_NOT_ENOUGH_MEMORY);

        match PendingWait::create(api.clone()) {
            Err(error::Error::EventCreation(err)) => {
                assert_eq!(err.code(), ERROR_NOT_ENOUGH_MEMORY)
            }
            Err(err) => panic!("unexpected error {err}"),
            Ok(_) => panic!("event created"),
        }
        assert_eq!(api.live_events(), 0);
    }
}
