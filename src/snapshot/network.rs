//! Network connection ownership snapshot
//!
//! Captures the four protocol/family connection-ownership tables
//! (TCP/UDP x IPv4/IPv6) and normalizes their rows into one
//! [`ConnectionEntry`] shape. Unlike the process and handle snapshots,
//! network capture surfaces its failure mode explicitly: a UI deciding
//! between "prompt to elevate" and "retry" needs to tell permission
//! denial apart from other failures, so the snapshot carries two
//! mutually exclusive status flags instead of silently going empty.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::snapshot::cursor::RecordCursor;

/// Transport protocol of a connection table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

/// Address family of a connection table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddressFamily {
    IPv4,
    IPv6,
}

/// One normalized connection-ownership row.
///
/// UDP carries no peer-connection state, so UDP rows leave the remote
/// address, remote port, and state at their zero defaults.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub protocol: TransportProtocol,
    pub address_family: AddressFamily,
    pub local_address: IpAddr,
    /// Local port in host byte order
    pub local_port: u16,
    pub remote_address: IpAddr,
    /// Remote port in host byte order (TCP only)
    pub remote_port: u16,
    /// TCP connection state code (TCP only)
    pub state: u8,
    /// Process ID of the owning process
    pub owning_process_id: u32,
}

/// Outcome of one ownership-table query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableStatus {
    Success,
    AccessDenied,
    Failed,
}

/// Immutable point-in-time snapshot of network connection ownership,
/// ordered by (owning pid, protocol, address family, local port, remote
/// port).
#[derive(Debug, Default)]
pub struct NetworkSnapshot {
    connections: Vec<ConnectionEntry>,
    access_denied: bool,
    capture_failed: bool,
}

impl NetworkSnapshot {
    /// Captures the four connection-ownership tables.
    ///
    /// If any table reports permission denial, `access_denied()` is set;
    /// if none did but at least one failed otherwise, `capture_failed()`
    /// is set. Either flag means `connections()` is empty - partial
    /// results from the tables that did succeed are discarded, because
    /// mixed partial data is worse than no data for the caller.
    pub fn capture() -> Self {
        let (tcp4_status, tcp4) = query_owner_table(TransportProtocol::Tcp, AddressFamily::IPv4);
        let (udp4_status, udp4) = query_owner_table(TransportProtocol::Udp, AddressFamily::IPv4);
        let (tcp6_status, tcp6) = query_owner_table(TransportProtocol::Tcp, AddressFamily::IPv6);
        let (udp6_status, udp6) = query_owner_table(TransportProtocol::Udp, AddressFamily::IPv6);

        let statuses = [tcp4_status, udp4_status, tcp6_status, udp6_status];
        let (access_denied, capture_failed) = resolve_status_flags(&statuses);
        if access_denied || capture_failed {
            tracing::warn!(
                access_denied,
                capture_failed,
                "network capture incomplete, discarding partial results"
            );
            return Self {
                connections: Vec::new(),
                access_denied,
                capture_failed,
            };
        }

        let mut connections = Vec::new();
        connections.extend(decode_rows::<TcpRowV4>(&tcp4).into_iter().map(from_tcp4));
        connections.extend(decode_rows::<UdpRowV4>(&udp4).into_iter().map(from_udp4));
        connections.extend(decode_rows::<TcpRowV6>(&tcp6).into_iter().map(from_tcp6));
        connections.extend(decode_rows::<UdpRowV6>(&udp6).into_iter().map(from_udp6));
        sort_connections(&mut connections);

        tracing::debug!(count = connections.len(), "captured network snapshot");
        Self {
            connections,
            access_denied: false,
            capture_failed: false,
        }
    }

    /// All captured connections; empty when either status flag is set.
    pub fn connections(&self) -> &[ConnectionEntry] {
        &self.connections
    }

    /// True when at least one ownership table reported permission denial.
    pub fn access_denied(&self) -> bool {
        self.access_denied
    }

    /// True when no table reported denial but at least one failed anyway.
    pub fn capture_failed(&self) -> bool {
        self.capture_failed
    }

    /// Connections owned by `process_id`.
    pub fn connections_for_process(&self, process_id: u32) -> Vec<ConnectionEntry> {
        self.connections
            .iter()
            .filter(|connection| connection.owning_process_id == process_id)
            .cloned()
            .collect()
    }

    /// Number of connections owned by `process_id`.
    pub fn connection_count_for_process(&self, process_id: u32) -> usize {
        self.connections
            .iter()
            .filter(|connection| connection.owning_process_id == process_id)
            .count()
    }
}

/// Folds the four per-table statuses into the two snapshot flags.
/// Denial takes precedence; the flags are never both set.
fn resolve_status_flags(statuses: &[TableStatus]) -> (bool, bool) {
    let access_denied = statuses
        .iter()
        .any(|status| *status == TableStatus::AccessDenied);
    let capture_failed = !access_denied
        && statuses.iter().any(|status| *status == TableStatus::Failed);
    (access_denied, capture_failed)
}

fn sort_connections(connections: &mut [ConnectionEntry]) {
    connections.sort_unstable_by_key(|connection| {
        (
            connection.owning_process_id,
            connection.protocol,
            connection.address_family,
            connection.local_port,
            connection.remote_port,
        )
    });
}

// ============================================================================
// Native table rows
// ============================================================================
//
// Layouts of the MIB_*ROW_OWNER_PID rows. Each table buffer is a u32 entry
// count followed by the row array. IPv4 addresses arrive as a u32 holding
// the octets in network order (first octet in the lowest byte); ports
// carry network byte order in their low 16 bits.

#[repr(C)]
#[derive(Clone, Copy)]
struct TcpRowV4 {
    state: u32,
    local_addr: u32,
    local_port: u32,
    remote_addr: u32,
    remote_port: u32,
    owning_pid: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct UdpRowV4 {
    local_addr: u32,
    local_port: u32,
    owning_pid: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct TcpRowV6 {
    local_addr: [u8; 16],
    local_scope_id: u32,
    local_port: u32,
    remote_addr: [u8; 16],
    remote_scope_id: u32,
    remote_port: u32,
    state: u32,
    owning_pid: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct UdpRowV6 {
    local_addr: [u8; 16],
    local_scope_id: u32,
    local_port: u32,
    owning_pid: u32,
}

/// Row array offset within a table buffer: the u32 count header.
const TABLE_ROWS_OFFSET: usize = 4;

fn decode_rows<T: Copy>(buffer: &[u8]) -> Vec<T> {
    if buffer.len() < TABLE_ROWS_OFFSET {
        return Vec::new();
    }
    let cursor = RecordCursor::new(buffer);
    let count: u32 = cursor.read_record().unwrap_or(0);
    cursor
        .read_array(TABLE_ROWS_OFFSET, count as usize)
        .unwrap_or_default()
}

fn port_from_network(raw: u32) -> u16 {
    u16::from_be(raw as u16)
}

fn ipv4_from_row(raw: u32) -> IpAddr {
    IpAddr::V4(Ipv4Addr::from(raw.to_le_bytes()))
}

fn from_tcp4(row: TcpRowV4) -> ConnectionEntry {
    ConnectionEntry {
        protocol: TransportProtocol::Tcp,
        address_family: AddressFamily::IPv4,
        local_address: ipv4_from_row(row.local_addr),
        local_port: port_from_network(row.local_port),
        remote_address: ipv4_from_row(row.remote_addr),
        remote_port: port_from_network(row.remote_port),
        state: row.state as u8,
        owning_process_id: row.owning_pid,
    }
}

fn from_udp4(row: UdpRowV4) -> ConnectionEntry {
    ConnectionEntry {
        protocol: TransportProtocol::Udp,
        address_family: AddressFamily::IPv4,
        local_address: ipv4_from_row(row.local_addr),
        local_port: port_from_network(row.local_port),
        remote_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        remote_port: 0,
        state: 0,
        owning_process_id: row.owning_pid,
    }
}

fn from_tcp6(row: TcpRowV6) -> ConnectionEntry {
    ConnectionEntry {
        protocol: TransportProtocol::Tcp,
        address_family: AddressFamily::IPv6,
        local_address: IpAddr::V6(Ipv6Addr::from(row.local_addr)),
        local_port: port_from_network(row.local_port),
        remote_address: IpAddr::V6(Ipv6Addr::from(row.remote_addr)),
        remote_port: port_from_network(row.remote_port),
        state: row.state as u8,
        owning_process_id: row.owning_pid,
    }
}

fn from_udp6(row: UdpRowV6) -> ConnectionEntry {
    ConnectionEntry {
        protocol: TransportProtocol::Udp,
        address_family: AddressFamily::IPv6,
        local_address: IpAddr::V6(Ipv6Addr::from(row.local_addr)),
        local_port: port_from_network(row.local_port),
        remote_address: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        remote_port: 0,
        state: 0,
        owning_process_id: row.owning_pid,
    }
}

#[cfg(windows)]
fn query_owner_table(
    protocol: TransportProtocol,
    family: AddressFamily,
) -> (TableStatus, Vec<u8>) {
    use std::ffi::c_void;

    use windows::Win32::Foundation::{ERROR_ACCESS_DENIED, ERROR_INSUFFICIENT_BUFFER, NO_ERROR};
    use windows::Win32::NetworkManagement::IpHelper::{
        GetExtendedTcpTable, GetExtendedUdpTable, TCP_TABLE_OWNER_PID_ALL, UDP_TABLE_OWNER_PID,
    };
    use windows::Win32::Networking::WinSock::{AF_INET, AF_INET6};

    let af = match family {
        AddressFamily::IPv4 => AF_INET.0 as u32,
        AddressFamily::IPv6 => AF_INET6.0 as u32,
    };
    let query = |table: Option<*mut c_void>, size: &mut u32| -> u32 {
        // SAFETY: `table` either is None (size probe) or points at `*size`
        // writable bytes; both forms are supported by the API.
        unsafe {
            match protocol {
                TransportProtocol::Tcp => {
                    GetExtendedTcpTable(table, size, true, af, TCP_TABLE_OWNER_PID_ALL, 0)
                }
                TransportProtocol::Udp => {
                    GetExtendedUdpTable(table, size, true, af, UDP_TABLE_OWNER_PID, 0)
                }
            }
        }
    };

    // Probe the required size with a null buffer, then fetch.
    let mut size = 0u32;
    let status = query(None, &mut size);
    if status == ERROR_ACCESS_DENIED.0 {
        return (TableStatus::AccessDenied, Vec::new());
    }
    if status == NO_ERROR.0 {
        // A table with no rows can succeed outright on the probe.
        return (TableStatus::Success, Vec::new());
    }
    if status != ERROR_INSUFFICIENT_BUFFER.0 {
        return (TableStatus::Failed, Vec::new());
    }

    let mut buffer = vec![0u8; size as usize];
    let status = query(Some(buffer.as_mut_ptr().cast()), &mut size);
    if status == ERROR_ACCESS_DENIED.0 {
        return (TableStatus::AccessDenied, Vec::new());
    }
    if status != NO_ERROR.0 {
        return (TableStatus::Failed, Vec::new());
    }
    (TableStatus::Success, buffer)
}

#[cfg(not(windows))]
fn query_owner_table(
    _protocol: TransportProtocol,
    _family: AddressFamily,
) -> (TableStatus, Vec<u8>) {
    (TableStatus::Failed, Vec::new())
}
