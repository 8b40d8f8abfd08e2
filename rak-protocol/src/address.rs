//! Connection identity

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// IP protocol version of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Version number as written in encoded addresses
    pub fn as_u8(self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

/// Unique key of a connection: host, port and IP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressKey {
    host: IpAddr,
    port: u16,
    version: IpVersion,
}

impl AddressKey {
    pub fn new(host: IpAddr, port: u16) -> Self {
        let version = match host {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        };
        AddressKey {
            host,
            port,
            version,
        }
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn version(&self) -> IpVersion {
        self.version
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl From<SocketAddr> for AddressKey {
    fn from(addr: SocketAddr) -> Self {
        AddressKey::new(addr.ip(), addr.port())
    }
}

impl From<AddressKey> for SocketAddr {
    fn from(key: AddressKey) -> Self {
        key.to_socket_addr()
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_socket_addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_needs_all_fields() {
        let a = AddressKey::from("127.0.0.1:19132".parse::<SocketAddr>().unwrap());
        let b = AddressKey::from("127.0.0.1:19132".parse::<SocketAddr>().unwrap());
        let other_port = AddressKey::from("127.0.0.1:19133".parse::<SocketAddr>().unwrap());
        let other_host = AddressKey::from("127.0.0.2:19132".parse::<SocketAddr>().unwrap());

        assert_eq!(a, b);
        assert_ne!(a, other_port);
        assert_ne!(a, other_host);

        let set: HashSet<AddressKey> = [a, b, other_port].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_version_follows_host() {
        let v4 = AddressKey::from("10.0.0.1:1".parse::<SocketAddr>().unwrap());
        let v6 = AddressKey::from("[::1]:1".parse::<SocketAddr>().unwrap());

        assert_eq!(v4.version(), IpVersion::V4);
        assert_eq!(v6.version(), IpVersion::V6);
        assert_eq!(v6.version().as_u8(), 6);
        assert_eq!(v6.to_socket_addr().to_string(), "[::1]:1");
    }
}
