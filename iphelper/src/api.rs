//! Seams between the crate and the operating system.
//!
//! [`NotifyApi`] carries everything the change notification machinery needs,
//! [`TableApi`] the table calls. Both speak raw Win32 status codes; the
//! callers in [`crate::event`], [`crate::notify`] and [`crate::route`] give
//! them meaning.

use crate::abi::{MibIpForwardRow, Overlapped, RawHandle};
use crate::error::OsError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Address,
    Route,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 2] = [ChangeKind::Address, ChangeKind::Route];

    /// Position of the kind in per-kind arrays.
    pub fn index(self) -> usize {
        match self {
            ChangeKind::Address => 0,
            ChangeKind::Route => 1,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Address => f.write_str("address"),
            ChangeKind::Route => f.write_str("route"),
        }
    }
}

pub trait NotifyApi: Send + Sync + 'static {
    /// Manual-reset, initially non-signalled event.
    fn create_event(&self) -> Result<RawHandle, OsError>;

    fn set_event(&self, event: RawHandle) -> Result<(), OsError>;

    fn reset_event(&self, event: RawHandle) -> Result<(), OsError>;

    fn close_event(&self, event: RawHandle) -> Result<(), OsError>;

    /// Returns the `WAIT_*` code; `WAIT_FAILED` is reported as the error.
    fn wait_event(&self, event: RawHandle, millis: u32) -> Result<u32, OsError>;

    /// `NotifyAddrChange` / `NotifyRouteChange`. Both pointers null selects
    /// the blocking form.
    ///
    /// # Safety
    /// A non-null `overlapped` must stay valid and unmoved until the
    /// registration fires or is cancelled.
    unsafe fn notify_change(
        &self,
        kind: ChangeKind,
        handle: *mut RawHandle,
        overlapped: *mut Overlapped,
    ) -> u32;

    /// `CancelIPChangeNotify`. False when nothing was pending on `overlapped`.
    ///
    /// # Safety
    /// `overlapped` must point to a live `Overlapped`.
    unsafe fn cancel_change_notify(&self, overlapped: *mut Overlapped) -> bool;
}

pub trait TableApi {
    /// `GetIpForwardTable`
    ///
    /// # Safety
    /// `table` must be writable for `*size` bytes and DWORD aligned.
    unsafe fn ip_forward_table(&self, table: *mut u8, size: *mut u32, order: bool) -> u32;

    /// `GetIpAddrTable`
    ///
    /// # Safety
    /// Same contract as [`TableApi::ip_forward_table`].
    unsafe fn ip_addr_table(&self, table: *mut u8, size: *mut u32, order: bool) -> u32;

    /// `GetAdaptersAddresses` for every address family.
    ///
    /// # Safety
    /// Same contract as [`TableApi::ip_forward_table`]. The records written
    /// point into `table`.
    unsafe fn adapters_addresses(&self, flags: u32, table: *mut u8, size: *mut u32) -> u32;

    fn create_ip_forward_entry(&self, row: &MibIpForwardRow) -> u32;

    fn delete_ip_forward_entry(&self, row: &MibIpForwardRow) -> u32;
}
