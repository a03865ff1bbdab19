//! Network interface address lookup.

use serde::Serialize;
use std::io;
use std::net::Ipv4Addr;

/// The first IPv4 address assigned to an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceAddress {
    pub addr: Ipv4Addr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netmask: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<Ipv4Addr>,
}

/// Looks up live interface addresses.
///
/// An interface that does not exist or has no IPv4 address yields `Ok(None)`.
pub trait AddressSource: Send + Sync {
    fn ipv4_address(&self, interface: &str) -> io::Result<Option<InterfaceAddress>>;
}

/// Queries the host with `getifaddrs(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAddresses;

impl AddressSource for SystemAddresses {
    #[cfg(unix)]
    fn ipv4_address(&self, interface: &str) -> io::Result<Option<InterfaceAddress>> {
        use std::ffi::CStr;

        let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
        // SAFETY: `head` is a valid out-pointer; on success the list is freed below.
        if unsafe { libc::getifaddrs(&mut head) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let mut found = None;
        let mut cursor = head;
        while !cursor.is_null() {
            // SAFETY: `cursor` is a non-null node of the list returned by getifaddrs.
            let entry = unsafe { &*cursor };
            cursor = entry.ifa_next;

            if entry.ifa_name.is_null() {
                continue;
            }
            // SAFETY: getifaddrs guarantees a NUL-terminated interface name.
            let name = unsafe { CStr::from_ptr(entry.ifa_name) };
            if name.to_bytes() != interface.as_bytes() {
                continue;
            }
            // SAFETY: pointers come straight from the getifaddrs node.
            let Some(addr) = (unsafe { sockaddr_ipv4(entry.ifa_addr) }) else {
                continue;
            };
            // SAFETY: `ifa_netmask` is null or a valid sockaddr owned by the list.
            let netmask = unsafe { sockaddr_ipv4(entry.ifa_netmask) };
            found = Some(InterfaceAddress {
                addr,
                netmask,
                broadcast: broadcast_of(entry),
            });
            break;
        }

        // SAFETY: `head` came from a successful getifaddrs call and is freed once.
        unsafe { libc::freeifaddrs(head) };

        tracing::debug!(interface, address = ?found, "looked up interface");
        Ok(found)
    }

    #[cfg(not(unix))]
    fn ipv4_address(&self, _interface: &str) -> io::Result<Option<InterfaceAddress>> {
        Ok(None)
    }
}

/// Read an IPv4 address out of a `sockaddr`, if it is one.
///
/// # Safety
///
/// `sa` must be null or point to a valid `sockaddr`.
#[cfg(unix)]
unsafe fn sockaddr_ipv4(sa: *const libc::sockaddr) -> Option<Ipv4Addr> {
    if sa.is_null() || i32::from((*sa).sa_family) != libc::AF_INET {
        return None;
    }
    let sin = &*(sa as *const libc::sockaddr_in);
    Some(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)))
}

#[cfg(target_os = "linux")]
fn broadcast_of(entry: &libc::ifaddrs) -> Option<Ipv4Addr> {
    if entry.ifa_flags & libc::IFF_BROADCAST as u32 == 0 {
        return None;
    }
    // SAFETY: with IFF_BROADCAST set, `ifa_ifu` holds the broadcast address.
    unsafe { sockaddr_ipv4(entry.ifa_ifu) }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn broadcast_of(_entry: &libc::ifaddrs) -> Option<Ipv4Addr> {
    None
}
