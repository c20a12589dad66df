//! Live bindings to kernel32 and iphlpapi, resolved once per process.

use crate::abi::{AF_UNSPEC, MibIpForwardRow, Overlapped, RawHandle, WAIT_FAILED};
use crate::api::{ChangeKind, NotifyApi, TableApi};
use crate::error::{self, OsError};
use log::debug;
use std::ffi::c_void;
use std::sync::{Arc, OnceLock};
use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
use windows::core::{PCSTR, PCWSTR, s, w};

type CreateEventWFn =
    unsafe extern "system" fn(*const c_void, i32, i32, *const u16) -> RawHandle;
type HandleFn = unsafe extern "system" fn(RawHandle) -> i32;
type WaitForSingleObjectFn = unsafe extern "system" fn(RawHandle, u32) -> u32;
type NotifyChangeFn = unsafe extern "system" fn(*mut RawHandle, *mut Overlapped) -> u32;
type CancelIpChangeNotifyFn = unsafe extern "system" fn(*const Overlapped) -> i32;
type GetTableFn = unsafe extern "system" fn(*mut u8, *mut u32, i32) -> u32;
type ForwardEntryFn = unsafe extern "system" fn(*const MibIpForwardRow) -> u32;
type GetAdaptersAddressesFn =
    unsafe extern "system" fn(u32, u32, *mut c_void, *mut u8, *mut u32) -> u32;

type LoadFailure = (&'static str, OsError);

static API: OnceLock<Result<Arc<SystemApi>, LoadFailure>> = OnceLock::new();

/// The operating system's implementation of [`NotifyApi`] and [`TableApi`].
pub struct SystemApi {
    create_event: CreateEventWFn,
    set_event: HandleFn,
    reset_event: HandleFn,
    close_handle: HandleFn,
    wait_for_single_object: WaitForSingleObjectFn,
    notify_addr_change: NotifyChangeFn,
    notify_route_change: NotifyChangeFn,
    cancel_ip_change_notify: CancelIpChangeNotifyFn,
    get_ip_forward_table: GetTableFn,
    get_ip_addr_table: GetTableFn,
    get_adapters_addresses: GetAdaptersAddressesFn,
    create_ip_forward_entry: ForwardEntryFn,
    delete_ip_forward_entry: ForwardEntryFn,
}

impl SystemApi {
    /// Loads the libraries on first use. A failed load is remembered.
    pub fn shared() -> error::Result<Arc<Self>> {
        API.get_or_init(Self::load)
            .clone()
            .map_err(|(name, source)| error::Error::Load { name, source })
    }

    fn load() -> Result<Arc<Self>, LoadFailure> {
        let kernel32 = library(w!("kernel32.dll"), "kernel32.dll")?;
        let iphlpapi = library(w!("iphlpapi.dll"), "iphlpapi.dll")?;

        let api = unsafe {
            Self {
                create_event: proc(kernel32, s!("CreateEventW"), "CreateEventW")?,
                set_event: proc(kernel32, s!("SetEvent"), "SetEvent")?,
                reset_event: proc(kernel32, s!("ResetEvent"), "ResetEvent")?,
                close_handle: proc(kernel32, s!("CloseHandle"), "CloseHandle")?,
                wait_for_single_object: proc(
                    kernel32,
                    s!("WaitForSingleObject"),
                    "WaitForSingleObject",
                )?,
                notify_addr_change: proc(iphlpapi, s!("NotifyAddrChange"), "NotifyAddrChange")?,
                notify_route_change: proc(
                    iphlpapi,
                    s!("NotifyRouteChange"),
                    "NotifyRouteChange",
                )?,
                cancel_ip_change_notify: proc(
                    iphlpapi,
                    s!("CancelIPChangeNotify"),
                    "CancelIPChangeNotify",
                )?,
                get_ip_forward_table: proc(
                    iphlpapi,
                    s!("GetIpForwardTable"),
                    "GetIpForwardTable",
                )?,
                get_ip_addr_table: proc(iphlpapi, s!("GetIpAddrTable"), "GetIpAddrTable")?,
                get_adapters_addresses: proc(
                    iphlpapi,
                    s!("GetAdaptersAddresses"),
                    "GetAdaptersAddresses",
                )?,
                create_ip_forward_entry: proc(
                    iphlpapi,
                    s!("CreateIpForwardEntry"),
                    "CreateIpForwardEntry",
                )?,
                delete_ip_forward_entry: proc(
                    iphlpapi,
                    s!("DeleteIpForwardEntry"),
                    "DeleteIpForwardEntry",
                )?,
            }
        };

        debug!("iphlpapi bindings loaded");
        Ok(Arc::new(api))
    }

    fn check(ok: i32) -> Result<(), OsError> {
        if ok != 0 { Ok(()) } else { Err(OsError::last()) }
    }
}

// The modules stay loaded for the life of the process.
fn library(name: PCWSTR, label: &'static str) -> Result<HMODULE, LoadFailure> {
    unsafe { LoadLibraryW(name) }.map_err(|_| (label, OsError::last()))
}

unsafe fn proc<F: Copy>(
    module: HMODULE,
    name: PCSTR,
    label: &'static str,
) -> Result<F, LoadFailure> {
    match unsafe { GetProcAddress(module, name) } {
        Some(f) => {
            debug_assert_eq!(size_of::<F>(), size_of_val(&f));
            Ok(unsafe { std::mem::transmute_copy(&f) })
        }
        None => Err((label, OsError::last())),
    }
}

impl NotifyApi for SystemApi {
    fn create_event(&self) -> Result<RawHandle, OsError> {
        let event = unsafe { (self.create_event)(std::ptr::null(), 1, 0, std::ptr::null()) };
        if event == 0 {
            return Err(OsError::last());
        }
        Ok(event)
    }

    fn set_event(&self, event: RawHandle) -> Result<(), OsError> {
        Self::check(unsafe { (self.set_event)(event) })
    }

    fn reset_event(&self, event: RawHandle) -> Result<(), OsError> {
        Self::check(unsafe { (self.reset_event)(event) })
    }

    fn close_event(&self, event: RawHandle) -> Result<(), OsError> {
        Self::check(unsafe { (self.close_handle)(event) })
    }

    fn wait_event(&self, event: RawHandle, millis: u32) -> Result<u32, OsError> {
        match unsafe { (self.wait_for_single_object)(event, millis) } {
            WAIT_FAILED => Err(OsError::last()),
            code => Ok(code),
        }
    }

    unsafe fn notify_change(
        &self,
        kind: ChangeKind,
        handle: *mut RawHandle,
        overlapped: *mut Overlapped,
    ) -> u32 {
        let call = match kind {
            ChangeKind::Address => self.notify_addr_change,
            ChangeKind::Route => self.notify_route_change,
        };
        unsafe { call(handle, overlapped) }
    }

    unsafe fn cancel_change_notify(&self, overlapped: *mut Overlapped) -> bool {
        unsafe { (self.cancel_ip_change_notify)(overlapped) != 0 }
    }
}

impl TableApi for SystemApi {
    unsafe fn ip_forward_table(&self, table: *mut u8, size: *mut u32, order: bool) -> u32 {
        unsafe { (self.get_ip_forward_table)(table, size, order.into()) }
    }

    unsafe fn ip_addr_table(&self, table: *mut u8, size: *mut u32, order: bool) -> u32 {
        unsafe { (self.get_ip_addr_table)(table, size, order.into()) }
    }

    unsafe fn adapters_addresses(&self, flags: u32, table: *mut u8, size: *mut u32) -> u32 {
        let reserved = std::ptr::null_mut();
        unsafe { (self.get_adapters_addresses)(AF_UNSPEC, flags, reserved, table, size) }
    }

    fn create_ip_forward_entry(&self, row: &MibIpForwardRow) -> u32 {
        unsafe { (self.create_ip_forward_entry)(row) }
    }

    fn delete_ip_forward_entry(&self, row: &MibIpForwardRow) -> u32 {
        unsafe { (self.delete_ip_forward_entry)(row) }
    }
}
