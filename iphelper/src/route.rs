//! IPv4 forward and address tables, and the adapter list.

use crate::abi::{
    self, Adapter, ERROR_BUFFER_OVERFLOW, ERROR_INSUFFICIENT_BUFFER, ERROR_NO_DATA,
    GAA_FLAG_INCLUDE_GATEWAYS, GAA_FLAG_INCLUDE_PREFIX, GAA_FLAG_INCLUDE_WINS_INFO, MibIpAddrRow,
    MibIpForwardRow, NO_ERROR, TableBuffer,
};
use crate::api::TableApi;
use crate::error::{self, OsError};
use std::fmt;
use std::net::Ipv4Addr;

const TABLE_ATTEMPTS: usize = 10;
// suggested first guess for GetAdaptersAddresses
const ADAPTERS_SIZE_HINT: usize = 15_000;
const ADAPTER_FLAGS: u32 =
    GAA_FLAG_INCLUDE_PREFIX | GAA_FLAG_INCLUDE_WINS_INFO | GAA_FLAG_INCLUDE_GATEWAYS;

impl MibIpForwardRow {
    pub fn dest(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.forward_dest)
    }

    pub fn set_dest(&mut self, addr: Ipv4Addr) {
        self.forward_dest = addr.octets();
    }

    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.forward_mask)
    }

    pub fn set_mask(&mut self, mask: Ipv4Addr) {
        self.forward_mask = mask.octets();
    }

    pub fn next_hop(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.forward_next_hop)
    }

    pub fn set_next_hop(&mut self, addr: Ipv4Addr) {
        self.forward_next_hop = addr.octets();
    }
}

impl fmt::Display for MibIpForwardRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}->{} Metric:{}",
            self.dest(),
            self.mask(),
            self.next_hop(),
            self.forward_metric1
        )
    }
}

impl MibIpAddrRow {
    pub fn address(&self) -> Ipv4Addr {
        abi::dword_to_ipv4(self.addr)
    }

    pub fn netmask(&self) -> Ipv4Addr {
        abi::dword_to_ipv4(self.mask)
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        abi::dword_to_ipv4(self.bcast_addr)
    }
}

impl fmt::Display for MibIpAddrRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {}/{} bcast:{} reasm:{}",
            self.index,
            self.address(),
            self.netmask(),
            self.broadcast(),
            self.reasm_size
        )
    }
}

pub fn forward_table<T: TableApi>(api: &T) -> error::Result<Vec<MibIpForwardRow>> {
    let call = |table, size| unsafe { api.ip_forward_table(table, size, false) };
    match read_table(0, call)? {
        Some(buf) => abi::decode_forward_table(buf.bytes()),
        None => Ok(Vec::new()),
    }
}

/// `order` sorts the rows by address.
pub fn address_table<T: TableApi>(api: &T, order: bool) -> error::Result<Vec<MibIpAddrRow>> {
    let call = |table, size| unsafe { api.ip_addr_table(table, size, order) };
    match read_table(0, call)? {
        Some(buf) => abi::decode_address_table(buf.bytes()),
        None => Ok(Vec::new()),
    }
}

/// Every adapter, IPv4 and IPv6, with prefixes and gateways.
pub fn adapters<T: TableApi>(api: &T) -> error::Result<Vec<Adapter>> {
    let call = |table, size| unsafe { api.adapters_addresses(ADAPTER_FLAGS, table, size) };
    match read_table(ADAPTERS_SIZE_HINT, call)? {
        Some(buf) => abi::decode_adapters(buf.bytes()),
        None => Ok(Vec::new()),
    }
}

pub fn create_forward_entry<T: TableApi>(api: &T, row: &MibIpForwardRow) -> error::Result<()> {
    match api.create_ip_forward_entry(row) {
        NO_ERROR => Ok(()),
        code => Err(OsError(code).into()),
    }
}

/// The OS matches on if index, dest, mask, next hop and proto.
pub fn delete_forward_entry<T: TableApi>(api: &T, row: &MibIpForwardRow) -> error::Result<()> {
    match api.delete_ip_forward_entry(row) {
        NO_ERROR => Ok(()),
        code => Err(OsError(code).into()),
    }
}

// Grows the buffer to the size the OS asks for. The table can grow between
// two calls, hence the retries. `None` when there is nothing to report.
fn read_table(
    hint: usize,
    mut call: impl FnMut(*mut u8, *mut u32) -> u32,
) -> error::Result<Option<TableBuffer>> {
    let mut wanted = hint;

    for _ in 0..TABLE_ATTEMPTS {
        let mut buf = TableBuffer::with_capacity(wanted);
        let mut size = buf.capacity() as u32;

        match call(buf.as_mut_ptr(), &mut size) {
            NO_ERROR => {
                buf.truncate(size as usize);
                return Ok(Some(buf));
            }
            ERROR_NO_DATA => return Ok(None),
            ERROR_INSUFFICIENT_BUFFER | ERROR_BUFFER_OVERFLOW => wanted = size as usize,
            code => return Err(OsError(code).into()),
        }
    }

    Err(OsError(ERROR_INSUFFICIENT_BUFFER).into())
}
