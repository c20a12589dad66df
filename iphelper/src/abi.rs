//! C layouts of the records exchanged with iphlpapi and kernel32.
//!
//! This is the only module that reinterprets raw memory. Everything it hands
//! out is an owned, plain value.

use crate::error;
use std::fmt;
use std::mem::{offset_of, size_of};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Raw `HANDLE` value.
pub type RawHandle = isize;

pub const NO_ERROR: u32 = 0;
pub const ERROR_INVALID_HANDLE: u32 = 6;
pub const ERROR_NOT_ENOUGH_MEMORY: u32 = 8;
pub const ERROR_NOT_SUPPORTED: u32 = 50;
pub const ERROR_BUFFER_OVERFLOW: u32 = 111;
pub const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
pub const ERROR_NO_DATA: u32 = 232;
pub const ERROR_IO_PENDING: u32 = 997;

pub const INFINITE: u32 = 0xFFFF_FFFF;

/// NTSTATUS values the OS leaves in [`Overlapped::internal`].
pub const STATUS_SUCCESS: usize = 0;
pub const STATUS_PENDING: usize = 0x0000_0103;
pub const STATUS_CANCELLED: usize = 0xC000_0120;

pub const AF_UNSPEC: u32 = 0;
pub const AF_INET: u16 = 2;
pub const AF_INET6: u16 = 23;

pub const GAA_FLAG_INCLUDE_PREFIX: u32 = 0x0010;
pub const GAA_FLAG_INCLUDE_WINS_INFO: u32 = 0x0040;
pub const GAA_FLAG_INCLUDE_GATEWAYS: u32 = 0x0080;

pub const WAIT_OBJECT_0: u32 = 0x0000_0000;
pub const WAIT_ABANDONED: u32 = 0x0000_0080;
pub const WAIT_TIMEOUT: u32 = 0x0000_0102;
pub const WAIT_FAILED: u32 = 0xFFFF_FFFF;

/// `OVERLAPPED`. The `Offset`/`Pointer` union is spelled out as its two
/// DWORD members; it has the pointer's size on both targets.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Overlapped {
    pub internal: usize,
    pub internal_high: usize,
    pub offset: u32,
    pub offset_high: u32,
    pub h_event: RawHandle,
}

/// `MIB_IPFORWARDROW`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MibIpForwardRow {
    pub forward_dest: [u8; 4],
    pub forward_mask: [u8; 4],
    pub forward_policy: u32,
    pub forward_next_hop: [u8; 4],
    pub forward_if_index: u32,
    /// 3 local interface, 4 remote interface
    pub forward_type: u32,
    /// 2 local interface, 3 static route, 5 EGP
    pub forward_proto: u32,
    pub forward_age: u32,
    pub forward_next_hop_as: u32,
    pub forward_metric1: u32,
    pub forward_metric2: u32,
    pub forward_metric3: u32,
    pub forward_metric4: u32,
    pub forward_metric5: u32,
}

/// `MIB_IPADDRROW_W2K`. Addresses are DWORDs with the first octet in the
/// low byte.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MibIpAddrRow {
    pub addr: u32,
    pub index: u32,
    pub mask: u32,
    pub bcast_addr: u32,
    pub reasm_size: u32,
    pub unused1: u16,
    pub unused2: u16,
}

/// Rows that may be copied out of an OS buffer. Implementors have no
/// padding and accept every bit pattern.
pub(crate) unsafe trait TableRow: Copy {}

unsafe impl TableRow for MibIpForwardRow {}
unsafe impl TableRow for MibIpAddrRow {}
unsafe impl TableRow for IpAdapterAddresses {}
unsafe impl TableRow for IpAdapterAddressEntry {}

/// `IP_ADAPTER_ADDRESSES_LH` up to the interface metrics, the part this
/// crate reads. Pointers are kept as plain addresses and only followed
/// through [`decode_adapters`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct IpAdapterAddresses {
    pub length: u32,
    pub if_index: u32,
    pub next: usize,
    pub adapter_name: usize,
    pub first_unicast_address: usize,
    pub first_anycast_address: usize,
    pub first_multicast_address: usize,
    pub first_dns_server_address: usize,
    pub dns_suffix: usize,
    pub description: usize,
    pub friendly_name: usize,
    pub physical_address: [u8; 8],
    pub physical_address_length: u32,
    pub flags: u32,
    pub mtu: u32,
    pub if_type: u32,
    pub oper_status: u32,
    pub ipv6_if_index: u32,
    pub zone_indices: [u32; 16],
    pub first_prefix: usize,
    pub transmit_link_speed: u64,
    pub receive_link_speed: u64,
    pub first_wins_server_address: usize,
    pub first_gateway_address: usize,
    pub ipv4_metric: u32,
    pub ipv6_metric: u32,
}

/// Head shared by the unicast, DNS server and gateway list entries: the
/// length/flags union, `Next` and a `SOCKET_ADDRESS`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct IpAdapterAddressEntry {
    pub length: u32,
    pub flags: u32,
    pub next: usize,
    pub sockaddr: usize,
    pub sockaddr_length: i32,
    pub reserved: [u8; size_of::<usize>() - 4],
}

// PrefixOrigin, SuffixOrigin, DadState and three lifetimes follow the head
const ON_LINK_PREFIX_LENGTH: usize = size_of::<IpAdapterAddressEntry>() + 6 * 4;

/// `HRESULT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hresult(pub u32);

impl Hresult {
    pub fn is_succeeded(self) -> bool {
        self.0 & (1 << 31) == 0
    }
}

/// Decodes a `MIB_IPFORWARDTABLE` buffer.
pub fn decode_forward_table(buf: &[u8]) -> error::Result<Vec<MibIpForwardRow>> {
    decode_table(buf, "MIB_IPFORWARDTABLE")
}

/// Decodes a `MIB_IPADDRTABLE` buffer.
pub fn decode_address_table(buf: &[u8]) -> error::Result<Vec<MibIpAddrRow>> {
    decode_table(buf, "MIB_IPADDRTABLE")
}

// dwNumEntries followed by ANY_SIZE rows; both row types are DWORD aligned,
// so the rows start right after the count.
fn decode_table<T: TableRow>(buf: &[u8], table: &str) -> error::Result<Vec<T>> {
    let header = size_of::<u32>();
    let Some(count) = buf.get(..header) else {
        return Err(error::Error::Decode(format!(
            "{table}: {} bytes, no entry count",
            buf.len()
        )));
    };
    let count = u32::from_ne_bytes([count[0], count[1], count[2], count[3]]) as usize;

    let row = size_of::<T>();
    let needed = count
        .checked_mul(row)
        .and_then(|rows| rows.checked_add(header));
    match needed {
        Some(needed) if needed <= buf.len() => {}
        _ => {
            return Err(error::Error::Decode(format!(
                "{table}: {count} entries do not fit in {} bytes",
                buf.len()
            )));
        }
    }

    let rows = (0..count)
        .map(|i| {
            let at = header + i * row;
            // bounds checked above; TableRow types accept any bit pattern
            unsafe { std::ptr::read_unaligned(buf[at..at + row].as_ptr().cast::<T>()) }
        })
        .collect();
    Ok(rows)
}

/// Lays rows out the way the OS fills a table.
#[cfg(test)]
pub(crate) fn encode_table<T: TableRow>(rows: &[T]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(size_of::<u32>() + rows.len() * size_of::<T>());
    buf.extend_from_slice(&(rows.len() as u32).to_ne_bytes());
    for row in rows {
        let bytes = unsafe {
            std::slice::from_raw_parts((row as *const T).cast::<u8>(), size_of::<T>())
        };
        buf.extend_from_slice(bytes);
    }
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfOperStatus {
    Up,
    Down,
    Testing,
    Unknown,
    Dormant,
    NotPresent,
    LowerLayerDown,
    Other(u32),
}

impl From<u32> for IfOperStatus {
    fn from(value: u32) -> Self {
        match value {
            1 => IfOperStatus::Up,
            2 => IfOperStatus::Down,
            3 => IfOperStatus::Testing,
            4 => IfOperStatus::Unknown,
            5 => IfOperStatus::Dormant,
            6 => IfOperStatus::NotPresent,
            7 => IfOperStatus::LowerLayerDown,
            other => IfOperStatus::Other(other),
        }
    }
}

impl fmt::Display for IfOperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IfOperStatus::Up => f.write_str("Up"),
            IfOperStatus::Down => f.write_str("Down"),
            IfOperStatus::Testing => f.write_str("Testing"),
            IfOperStatus::Unknown => f.write_str("Unknown"),
            IfOperStatus::Dormant => f.write_str("Dormant"),
            IfOperStatus::NotPresent => f.write_str("NotPresent"),
            IfOperStatus::LowerLayerDown => f.write_str("LowerLayerDown"),
            IfOperStatus::Other(value) => write!(f, "{value}"),
        }
    }
}

/// Unicast address with its on-link prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnicastAddress {
    pub addr: IpAddr,
    pub prefix_len: u8,
}

impl fmt::Display for UnicastAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// One adapter of the `GetAdaptersAddresses` list, copied out of the OS
/// buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adapter {
    pub index: u32,
    pub name: String,
    pub friendly_name: String,
    pub description: String,
    pub hardware_addr: Vec<u8>,
    pub mtu: u32,
    pub if_type: u32,
    pub oper_status: IfOperStatus,
    pub unicast: Vec<UnicastAddress>,
    /// Empty when the OS record predates gateway reporting.
    pub gateways: Vec<IpAddr>,
    pub dns_servers: Vec<IpAddr>,
}

impl Adapter {
    /// `aa-bb-cc-dd-ee-ff`, empty for adapters without one.
    pub fn mac(&self) -> String {
        self.hardware_addr
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join("-")
    }

    pub fn ipv4(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.unicast.iter().filter_map(|u| match u.addr {
            IpAddr::V4(addr) => Some(addr),
            IpAddr::V6(_) => None,
        })
    }
}

/// Decodes the adapter list `GetAdaptersAddresses` writes. The records link
/// to each other and to their strings by absolute address, so `buf` must be
/// the very memory the OS filled; a pointer leaving it is an error.
pub fn decode_adapters(buf: &[u8]) -> error::Result<Vec<Adapter>> {
    let view = View {
        buf,
        base: buf.as_ptr() as usize,
    };

    let mut adapters = Vec::new();
    let mut next = if buf.is_empty() { 0 } else { view.base };
    while next != 0 {
        if adapters.len() > buf.len() / size_of::<IpAdapterAddresses>() {
            return Err(error::Error::Decode("adapter list loops".into()));
        }
        let raw: IpAdapterAddresses = view.read(next)?;
        adapters.push(view.adapter(&raw)?);
        next = raw.next;
    }
    Ok(adapters)
}

struct View<'a> {
    buf: &'a [u8],
    base: usize,
}

impl View<'_> {
    fn slice(&self, ptr: usize, len: usize) -> error::Result<&[u8]> {
        ptr.checked_sub(self.base)
            .and_then(|start| Some(start..start.checked_add(len)?))
            .and_then(|range| self.buf.get(range))
            .ok_or_else(|| {
                let msg = format!("{len} bytes at {ptr:#x} outside the adapter buffer");
                error::Error::Decode(msg)
            })
    }

    fn tail(&self, ptr: usize) -> error::Result<&[u8]> {
        let len = (self.base + self.buf.len()).saturating_sub(ptr);
        self.slice(ptr, len)
    }

    fn read<T: TableRow>(&self, ptr: usize) -> error::Result<T> {
        let bytes = self.slice(ptr, size_of::<T>())?;
        // length checked by `slice`; TableRow types accept any bit pattern
        Ok(unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<T>()) })
    }

    fn ansi(&self, ptr: usize) -> error::Result<String> {
        if ptr == 0 {
            return Ok(String::new());
        }
        let bytes = self.tail(ptr)?;
        let end = bytes
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| error::Error::Decode(format!("unterminated string at {ptr:#x}")))?;
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    fn wide(&self, ptr: usize) -> error::Result<String> {
        if ptr == 0 {
            return Ok(String::new());
        }
        let units: Vec<u16> = self
            .tail(ptr)?
            .chunks_exact(2)
            .map(|unit| u16::from_ne_bytes([unit[0], unit[1]]))
            .collect();
        let end = units
            .iter()
            .position(|unit| *unit == 0)
            .ok_or_else(|| error::Error::Decode(format!("unterminated string at {ptr:#x}")))?;
        Ok(String::from_utf16_lossy(&units[..end]))
    }

    fn sockaddr(&self, ptr: usize, len: i32) -> error::Result<IpAddr> {
        let bytes = self.slice(ptr, usize::try_from(len).unwrap_or(0))?;
        let family = match bytes {
            [lo, hi, ..] => u16::from_ne_bytes([*lo, *hi]),
            _ => return Err(error::Error::Decode(format!("empty socket address at {ptr:#x}"))),
        };

        match (family, bytes.len()) {
            // sockaddr_in: family, port, then the address
            (AF_INET, 16..) => Ok(IpAddr::V4(Ipv4Addr::new(
                bytes[4], bytes[5], bytes[6], bytes[7],
            ))),
            // sockaddr_in6: family, port, flow info, then the address
            (AF_INET6, 24..) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&bytes[8..24]);
                Ok(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            (family, len) => Err(error::Error::Decode(format!(
                "unsupported socket address, family {family}, {len} bytes"
            ))),
        }
    }

    fn entries(&self, first: usize) -> error::Result<Vec<(usize, IpAdapterAddressEntry)>> {
        let mut entries = Vec::new();
        let mut next = first;
        while next != 0 {
            if entries.len() > self.buf.len() / size_of::<IpAdapterAddressEntry>() {
                return Err(error::Error::Decode("address list loops".into()));
            }
            let entry: IpAdapterAddressEntry = self.read(next)?;
            entries.push((next, entry));
            next = entry.next;
        }
        Ok(entries)
    }

    fn addresses(&self, first: usize) -> error::Result<Vec<IpAddr>> {
        self.entries(first)?
            .into_iter()
            .map(|(_, entry)| self.sockaddr(entry.sockaddr, entry.sockaddr_length))
            .collect()
    }

    fn adapter(&self, raw: &IpAdapterAddresses) -> error::Result<Adapter> {
        let mut unicast = Vec::new();
        for (at, entry) in self.entries(raw.first_unicast_address)? {
            // absent on records from before Vista
            let prefix_len = if entry.length as usize > ON_LINK_PREFIX_LENGTH {
                self.slice(at + ON_LINK_PREFIX_LENGTH, 1)?[0]
            } else {
                0
            };
            unicast.push(UnicastAddress {
                addr: self.sockaddr(entry.sockaddr, entry.sockaddr_length)?,
                prefix_len,
            });
        }

        let gateway_end =
            offset_of!(IpAdapterAddresses, first_gateway_address) + size_of::<usize>();
        let gateways = if raw.length as usize >= gateway_end {
            self.addresses(raw.first_gateway_address)?
        } else {
            Vec::new()
        };

        let hardware_len = (raw.physical_address_length as usize).min(raw.physical_address.len());

        Ok(Adapter {
            index: raw.if_index,
            name: self.ansi(raw.adapter_name)?,
            friendly_name: self.wide(raw.friendly_name)?,
            description: self.wide(raw.description)?,
            hardware_addr: raw.physical_address[..hardware_len].to_vec(),
            mtu: raw.mtu,
            if_type: raw.if_type,
            oper_status: IfOperStatus::from(raw.oper_status),
            unicast,
            gateways,
            dns_servers: self.addresses(raw.first_dns_server_address)?,
        })
    }
}

/// DWORD-aligned buffer for the OS to fill. Table decoders read it in
/// place, so adapter records keep pointing into live memory.
pub(crate) struct TableBuffer {
    words: Vec<u64>,
    len: usize,
}

impl TableBuffer {
    pub(crate) fn with_capacity(bytes: usize) -> Self {
        let words = vec![0u64; bytes.div_ceil(8).max(1)];
        let len = words.len() * 8;
        Self { words, len }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.words.len() * 8
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr().cast()
    }

    /// Keeps the first `len` bytes, the part the OS reported as filled.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.len = len.min(self.capacity());
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.len) }
    }
}

pub fn dword_to_ipv4(value: u32) -> Ipv4Addr {
    Ipv4Addr::from(value.to_le_bytes())
}

pub fn ipv4_to_dword(addr: Ipv4Addr) -> u32 {
    u32::from_le_bytes(addr.octets())
}
