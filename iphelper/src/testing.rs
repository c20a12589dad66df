//! In-process stand-in for the OS, used by the unit tests.

use crate::abi::{
    ERROR_INVALID_HANDLE, ERROR_IO_PENDING, INFINITE, NO_ERROR, Overlapped, RawHandle,
    STATUS_CANCELLED, STATUS_PENDING, STATUS_SUCCESS, WAIT_ABANDONED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use crate::api::{ChangeKind, NotifyApi};
use crate::error::OsError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Clear,
    Set,
    Abandoned,
}

type Hook = Box<dyn FnOnce() + Send>;

/// An outstanding registration. `overlapped` is the record's address; the
/// fake writes the completion status through it like the OS does.
#[derive(Debug, Clone, Copy)]
struct Registration {
    kind: ChangeKind,
    event: RawHandle,
    overlapped: usize,
}

impl Registration {
    fn finish(&self, status: usize) {
        let record = self.overlapped as *mut Overlapped;
        unsafe { std::ptr::write_volatile(&raw mut (*record).internal, status) };
    }
}

#[derive(Default)]
struct Inner {
    next_handle: RawHandle,
    events: HashMap<RawHandle, Signal>,
    pending: Vec<Registration>,
    // cancelled, completion held back until `complete_cancelled`
    cancelling: Vec<Registration>,
    defer_cancel: bool,
    hooks: HashMap<ChangeKind, Hook>,
    registration_failures: HashMap<ChangeKind, VecDeque<u32>>,
    create_failure: Option<(usize, u32)>,
    registrations: [usize; 2],
    created: usize,
    closed: usize,
    cancels: usize,
}

pub(crate) struct FakeApi {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl FakeApi {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Simulates a change: completes every registration of `kind`.
    pub(crate) fn fire(&self, kind: ChangeKind) -> usize {
        self.complete(kind, Signal::Set)
    }

    /// Completes every registration of `kind` with an abandoned wait.
    pub(crate) fn abandon_pending(&self, kind: ChangeKind) -> usize {
        self.complete(kind, Signal::Abandoned)
    }

    pub(crate) fn abandon(&self, event: RawHandle) {
        let mut inner = self.lock();
        if let Some(signal) = inner.events.get_mut(&event) {
            *signal = Signal::Abandoned;
        }
        self.changed.notify_all();
    }

    fn complete(&self, kind: ChangeKind, signal: Signal) -> usize {
        let mut inner = self.lock();
        let (fired, kept): (Vec<_>, Vec<_>) =
            inner.pending.drain(..).partition(|r| r.kind == kind);
        inner.pending = kept;

        for registration in &fired {
            registration.finish(STATUS_SUCCESS);
            if let Some(state) = inner.events.get_mut(&registration.event) {
                *state = signal;
            }
        }
        self.changed.notify_all();
        fired.len()
    }

    /// Cancelled registrations stay outstanding until
    /// [`FakeApi::complete_cancelled`].
    pub(crate) fn defer_cancellation(&self) {
        self.lock().defer_cancel = true;
    }

    pub(crate) fn complete_cancelled(&self) -> usize {
        let mut inner = self.lock();
        inner.defer_cancel = false;
        let cancelled: Vec<_> = inner.cancelling.drain(..).collect();

        for registration in &cancelled {
            registration.finish(STATUS_CANCELLED);
            if let Some(state) = inner.events.get_mut(&registration.event) {
                *state = Signal::Set;
            }
        }
        self.changed.notify_all();
        cancelled.len()
    }

    /// Runs `hook` right after the next registration of `kind` is accepted.
    pub(crate) fn on_next_registration(
        &self,
        kind: ChangeKind,
        hook: impl FnOnce() + Send + 'static,
    ) {
        self.lock().hooks.insert(kind, Box::new(hook));
    }

    pub(crate) fn fail_next_registration(&self, kind: ChangeKind, code: u32) {
        self.lock()
            .registration_failures
            .entry(kind)
            .or_default()
            .push_back(code);
    }

    pub(crate) fn fail_next_create(&self, code: u32) {
        self.fail_create_at(0, code);
    }

    /// Lets `skip` creations succeed, then fails one.
    pub(crate) fn fail_create_at(&self, skip: usize, code: u32) {
        self.lock().create_failure = Some((skip, code));
    }

    pub(crate) fn pending(&self, kind: ChangeKind) -> usize {
        self.lock().pending.iter().filter(|r| r.kind == kind).count()
    }

    pub(crate) fn registrations(&self, kind: ChangeKind) -> usize {
        self.lock().registrations[kind.index()]
    }

    pub(crate) fn live_events(&self) -> usize {
        self.lock().events.len()
    }

    pub(crate) fn created_events(&self) -> usize {
        self.lock().created
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.lock().closed
    }

    pub(crate) fn cancel_calls(&self) -> usize {
        self.lock().cancels
    }
}

impl NotifyApi for FakeApi {
    fn create_event(&self) -> Result<RawHandle, OsError> {
        let mut inner = self.lock();
        if let Some((skip, code)) = inner.create_failure {
            if skip == 0 {
                inner.create_failure = None;
                return Err(OsError(code));
            }
            inner.create_failure = Some((skip - 1, code));
        }

        inner.next_handle += 4;
        let event = 0x100 + inner.next_handle;
        inner.events.insert(event, Signal::Clear);
        inner.created += 1;
        Ok(event)
    }

    fn set_event(&self, event: RawHandle) -> Result<(), OsError> {
        let mut inner = self.lock();
        let signal = inner
            .events
            .get_mut(&event)
            .ok_or(OsError(ERROR_INVALID_HANDLE))?;
        *signal = Signal::Set;
        self.changed.notify_all();
        Ok(())
    }

    fn reset_event(&self, event: RawHandle) -> Result<(), OsError> {
        let mut inner = self.lock();
        let signal = inner
            .events
            .get_mut(&event)
            .ok_or(OsError(ERROR_INVALID_HANDLE))?;
        if *signal == Signal::Set {
            *signal = Signal::Clear;
        }
        Ok(())
    }

    fn close_event(&self, event: RawHandle) -> Result<(), OsError> {
        let mut inner = self.lock();
        inner
            .events
            .remove(&event)
            .ok_or(OsError(ERROR_INVALID_HANDLE))?;
        inner.pending.retain(|r| r.event != event);
        inner.cancelling.retain(|r| r.event != event);
        inner.closed += 1;
        self.changed.notify_all();
        Ok(())
    }

    fn wait_event(&self, event: RawHandle, millis: u32) -> Result<u32, OsError> {
        let deadline =
            (millis != INFINITE).then(|| Instant::now() + Duration::from_millis(millis.into()));

        let mut inner = self.lock();
        loop {
            match inner.events.get(&event) {
                None => return Err(OsError(ERROR_INVALID_HANDLE)),
                Some(Signal::Set) => return Ok(WAIT_OBJECT_0),
                Some(Signal::Abandoned) => return Ok(WAIT_ABANDONED),
                Some(Signal::Clear) => {}
            }

            inner = match deadline {
                None => self.changed.wait(inner).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(WAIT_TIMEOUT);
                    }
                    self.changed.wait_timeout(inner, deadline - now).unwrap().0
                }
            };
        }
    }

    unsafe fn notify_change(
        &self,
        kind: ChangeKind,
        handle: *mut RawHandle,
        overlapped: *mut Overlapped,
    ) -> u32 {
        let mut inner = self.lock();
        let failure = inner
            .registration_failures
            .get_mut(&kind)
            .and_then(VecDeque::pop_front);
        if let Some(code) = failure {
            return code;
        }

        if overlapped.is_null() {
            return NO_ERROR;
        }

        let registration = Registration {
            kind,
            event: unsafe { (*overlapped).h_event },
            overlapped: overlapped as usize,
        };
        registration.finish(STATUS_PENDING);
        if !handle.is_null() {
            unsafe { *handle = registration.event };
        }
        // issuing the request clears the event
        if let Some(signal) = inner.events.get_mut(&registration.event) {
            *signal = Signal::Clear;
        }
        inner.pending.push(registration);
        inner.registrations[kind.index()] += 1;

        let hook = inner.hooks.remove(&kind);
        drop(inner);
        if let Some(hook) = hook {
            hook();
        }
        ERROR_IO_PENDING
    }

    unsafe fn cancel_change_notify(&self, overlapped: *mut Overlapped) -> bool {
        let address = overlapped as usize;
        let mut inner = self.lock();
        inner.cancels += 1;

        let Some(at) = inner.pending.iter().position(|r| r.overlapped == address) else {
            return false;
        };
        let registration = inner.pending.remove(at);
        if inner.defer_cancel {
            inner.cancelling.push(registration);
            return true;
        }

        registration.finish(STATUS_CANCELLED);
        if let Some(signal) = inner.events.get_mut(&registration.event) {
            *signal = Signal::Set;
        }
        self.changed.notify_all();
        true
    }
}

/// Polls `check` until it holds or a few seconds pass.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
