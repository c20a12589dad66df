//! Arming and cancelling single-shot change registrations.

use crate::abi::{ERROR_IO_PENDING, NO_ERROR, RawHandle};
use crate::api::{ChangeKind, NotifyApi};
use crate::error::{self, OsError};
use crate::event::PendingWait;

/// Arms one future wake of `wait` for the next change of `kind`. The OS
/// does not re-arm by itself; call again after every wake.
pub fn arm<A: NotifyApi>(api: &A, kind: ChangeKind, wait: &PendingWait<A>) -> error::Result<()> {
    let mut handle: RawHandle = 0;
    // the overlapped record lives in a box owned by `wait`
    let code = unsafe { api.notify_change(kind, &mut handle, wait.overlapped()) };

    match code {
        ERROR_IO_PENDING => Ok(()),
        code => Err(error::Error::Registration {
            kind,
            source: OsError(code),
        }),
    }
}

/// Cancels the registration outstanding on `wait`, if any. The OS signals
/// the event when it cancels.
pub fn cancel<A: NotifyApi>(api: &A, wait: &PendingWait<A>) -> bool {
    unsafe { api.cancel_change_notify(wait.overlapped()) }
}

/// Blocks the calling thread until the next change of `kind`.
pub fn wait_for_change<A: NotifyApi>(api: &A, kind: ChangeKind) -> error::Result<()> {
    let code = unsafe { api.notify_change(kind, std::ptr::null_mut(), std::ptr::null_mut()) };

    match code {
        NO_ERROR => Ok(()),
        code => Err(error::Error::Registration {
            kind,
            source: OsError(code),
        }),
    }
}
