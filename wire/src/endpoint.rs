// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Network endpoints: the `from`/`to` address pair carried by every kernel,
//! and by the sockets and connections that route them.

use std::fmt::{self, Display};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::path::{Path, PathBuf};

use crate::be::{Reader, Underrun, write_bytes, write_u16, write_u32, write_u8};

const FAMILY_IPV4: u8 = 4;
const FAMILY_IPV6: u8 = 6;
const FAMILY_UNIX: u8 = 0;

/// A destination a kernel can be routed to: an IPv4 or IPv6 socket address,
/// or a local Unix-domain path used by the process pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    V4(SocketAddrV4),
    V6(SocketAddrV6),
    Unix(PathBuf),
}

/// Errors decoding an [`Endpoint`] off the wire.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("unknown address family tag {0}")]
    UnknownFamily(u8),
    #[error(transparent)]
    Underrun(#[from] Underrun),
    #[error("unix path is not valid utf-8")]
    InvalidUnixPath,
}

impl Endpoint {
    #[must_use]
    pub fn new_ipv4(addr: Ipv4Addr, port: u16) -> Self {
        Endpoint::V4(SocketAddrV4::new(addr, port))
    }

    #[must_use]
    pub fn new_ipv6(addr: Ipv6Addr, port: u16) -> Self {
        Endpoint::V6(SocketAddrV6::new(addr, port, 0, 0))
    }

    #[must_use]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix(path.into())
    }

    /// The port, for the address families that have one. Unix endpoints
    /// have no port and return `None`.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        match self {
            Endpoint::V4(a) => Some(a.port()),
            Endpoint::V6(a) => Some(a.port()),
            Endpoint::Unix(_) => None,
        }
    }

    #[must_use]
    pub fn as_unix_path(&self) -> Option<&Path> {
        match self {
            Endpoint::Unix(p) => Some(p.as_path()),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Endpoint::V4(a) => Some(SocketAddr::V4(*a)),
            Endpoint::V6(a) => Some(SocketAddr::V6(*a)),
            Endpoint::Unix(_) => None,
        }
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        match self {
            Endpoint::V4(a) => {
                write_u8(buf, FAMILY_IPV4);
                buf.extend_from_slice(&a.ip().octets());
                write_u16(buf, a.port());
            }
            Endpoint::V6(a) => {
                write_u8(buf, FAMILY_IPV6);
                buf.extend_from_slice(&a.ip().octets());
                write_u16(buf, a.port());
            }
            Endpoint::Unix(p) => {
                write_u8(buf, FAMILY_UNIX);
                write_bytes(buf, p.to_string_lossy().as_bytes());
                // no port field for unix paths; write a zero filler so the
                // on-wire record width for this branch is self-describing
                // without a separate variant-length table.
                write_u32(buf, 0);
            }
        }
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self, EndpointError> {
        match r.read_u8()? {
            FAMILY_IPV4 => {
                let mut octets = [0u8; 4];
                for o in &mut octets {
                    *o = r.read_u8()?;
                }
                let port = r.read_u16()?;
                Ok(Endpoint::new_ipv4(Ipv4Addr::from(octets), port))
            }
            FAMILY_IPV6 => {
                let mut octets = [0u8; 16];
                for o in &mut octets {
                    *o = r.read_u8()?;
                }
                let port = r.read_u16()?;
                Ok(Endpoint::new_ipv6(Ipv6Addr::from(octets), port))
            }
            FAMILY_UNIX => {
                let bytes = r.read_bytes()?;
                let _filler = r.read_u32()?;
                let s = std::str::from_utf8(bytes).map_err(|_| EndpointError::InvalidUnixPath)?;
                Ok(Endpoint::unix(s))
            }
            other => Err(EndpointError::UnknownFamily(other)),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(a) => Endpoint::V4(a),
            SocketAddr::V6(a) => Endpoint::V6(a),
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::V4(a) => write!(f, "{a}"),
            Endpoint::V6(a) => write!(f, "{a}"),
            Endpoint::Unix(p) => write!(f, "unix:{}", p.display()),
        }
    }
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use super::Endpoint;
    use bolero::{Driver, TypeGenerator};
    use std::net::{Ipv4Addr, Ipv6Addr};

    impl TypeGenerator for Endpoint {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(match driver.produce::<u8>()? % 3 {
                0 => Endpoint::new_ipv4(Ipv4Addr::from(driver.produce::<[u8; 4]>()?), driver.produce()?),
                1 => Endpoint::new_ipv6(Ipv6Addr::from(driver.produce::<[u8; 16]>()?), driver.produce()?),
                _ => Endpoint::unix(driver.produce::<String>()?),
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::be::Reader;

    #[test]
    fn parse_back() {
        bolero::check!().with_type().for_each(|e: &Endpoint| {
            let mut buf = Vec::new();
            e.write(&mut buf);
            let mut r = Reader::new(&buf);
            let back = Endpoint::read(&mut r).unwrap();
            assert_eq!(&back, e);
        });
    }

    #[test]
    fn v4_display() {
        let e = Endpoint::new_ipv4(Ipv4Addr::new(10, 0, 0, 1), 9001);
        assert_eq!(e.to_string(), "10.0.0.1:9001");
    }

    #[test]
    fn unknown_family_is_rejected() {
        let buf = vec![9u8, 0, 0, 0, 0];
        let mut r = Reader::new(&buf);
        assert_eq!(
            Endpoint::read(&mut r).unwrap_err(),
            EndpointError::UnknownFamily(9)
        );
    }
}
