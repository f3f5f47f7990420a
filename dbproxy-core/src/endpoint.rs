//! Addressable endpoints: address + port + protocol, with a deterministic
//! classification derived from the numeric address.
//!
//! Internally the address is always kept as an IPv6 value; an IPv4 address
//! is stored as its IPv4-mapped subrange so that equality and ordering only
//! ever need to compare one 128-bit value.

use crate::error::{ProxyError, ProxyResult};
use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// The transport protocol an endpoint was resolved for, used only to pick
/// the right `getservbyname`-style lookup for symbolic port names.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
    Unspecified,
}

impl Protocol {
    fn service_proto(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Unspecified => "tcp",
        }
    }
}

/// The deterministic classification of an endpoint's numeric address.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EndpointClass {
    Any,
    Loopback,
    LinkLocal,
    Multicast,
    Private,
    Carrier,
    Public,
}

/// An (address, port, protocol) triple with a derived classification.
///
/// `Endpoint` is an immutable value type: equality and ordering only
/// consider the raw 128-bit address, never the port or protocol.
#[derive(Clone, Copy, Debug)]
pub struct Endpoint {
    addr: Ipv6Addr,
    port: Option<u16>,
    protocol: Protocol,
}

impl Endpoint {
    /// Builds an endpoint directly from an already-resolved address.
    pub fn new(addr: IpAddr, port: Option<u16>, protocol: Protocol) -> ProxyResult<Self> {
        if let Some(p) = port {
            if p == 0 {
                return Err(ProxyError::parameter(format!(
                    "port out of range: {p}"
                )));
            }
        }
        Ok(Self {
            addr: to_v6(addr),
            port,
            protocol,
        })
    }

    /// Parses `"address:port"`, `"[ipv6]:port"`, or `":port"` with an
    /// optional default address/port. IPv6 addresses require brackets when
    /// a port follows; IPv4 addresses must never be bracketed.
    ///
    /// When the port component is not numeric it is resolved as a service
    /// name for the given protocol.
    pub fn parse(
        input: &str,
        default_addr: Option<&str>,
        default_port: Option<u16>,
        protocol: Protocol,
    ) -> ProxyResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return match (default_addr, default_port) {
                (Some(a), Some(p)) => Self::parse_pair(a, Some(&p.to_string()), protocol),
                _ => Err(ProxyError::parameter(
                    "empty address with no default address and port",
                )),
            };
        }

        let (addr_part, port_part): (&str, Option<&str>) = if let Some(rest) = input.strip_prefix(':') {
            ("", Some(rest))
        } else if let Some(rest) = input.strip_prefix('[') {
            let close = rest
                .find(']')
                .ok_or_else(|| ProxyError::parameter(format!("unterminated bracket in {input:?}")))?;
            let addr = &rest[..close];
            let tail = &rest[close + 1..];
            if let Some(p) = tail.strip_prefix(':') {
                (addr, Some(p))
            } else if tail.is_empty() {
                (addr, None)
            } else {
                return Err(ProxyError::parameter(format!(
                    "unexpected trailing characters after bracketed address: {input:?}"
                )));
            }
        } else {
            match input.rsplit_once(':') {
                // Could be "host:port" or a bare IPv6 address (which itself
                // contains colons). Disambiguate by counting colons: a bare
                // IPv6 address has more than one.
                Some((addr, port)) if input.matches(':').count() == 1 => (addr, Some(port)),
                _ => {
                    if input.contains('[') || (input.contains(':') && input.matches(':').count() == 1) {
                        return Err(ProxyError::parameter(format!(
                            "ill-formed bracketing in {input:?}"
                        )));
                    }
                    (input, None)
                }
            }
        };

        if addr_part.parse::<Ipv4Addr>().is_ok() && input.starts_with('[') {
            return Err(ProxyError::parameter(format!(
                "IPv4 address must not be bracketed: {input:?}"
            )));
        }

        let addr_part = if addr_part.is_empty() {
            default_addr.ok_or_else(|| ProxyError::parameter("empty address with no default"))?
        } else {
            addr_part
        };

        Self::parse_pair(addr_part, port_part, protocol).or_else(|e| {
            if port_part.is_none() {
                if let Some(p) = default_port {
                    return Self::parse_pair(addr_part, Some(&p.to_string()), protocol);
                }
            }
            Err(e)
        })
    }

    fn parse_pair(addr: &str, port: Option<&str>, protocol: Protocol) -> ProxyResult<Self> {
        let ip = parse_address(addr)?;
        let port = match port {
            None => None,
            Some(p) => Some(resolve_port(p, protocol)?),
        };
        Self::new(ip, port, protocol)
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The address in its native form: `Ipv4Addr` for mapped addresses,
    /// `Ipv6Addr` otherwise.
    pub fn address(&self) -> IpAddr {
        match self.addr.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(self.addr),
        }
    }

    pub fn classify(&self) -> EndpointClass {
        classify_v6(self.addr)
    }

    /// Whether this endpoint's address matches one of this machine's live
    /// interface addresses.
    pub fn is_local_interface(&self, interfaces: &[IpAddr]) -> bool {
        let target = to_v6(self.address());
        interfaces.iter().any(|i| to_v6(*i) == target)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address() {
            IpAddr::V4(v4) => match self.port {
                Some(p) => write!(f, "{v4}:{p}"),
                None => write!(f, "{v4}"),
            },
            IpAddr::V6(v6) => match self.port {
                Some(p) => write!(f, "[{v6}]:{p}"),
                None => write!(f, "{v6}"),
            },
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}
impl Eq for Endpoint {}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr.octets().cmp(&other.addr.octets())
    }
}

fn to_v6(addr: IpAddr) -> Ipv6Addr {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

fn parse_address(addr: &str) -> ProxyResult<IpAddr> {
    if let Ok(v4) = addr.parse::<Ipv4Addr>() {
        return Ok(IpAddr::V4(v4));
    }
    if let Ok(v6) = addr.parse::<Ipv6Addr>() {
        return Ok(IpAddr::V6(v6));
    }
    Err(ProxyError::parameter(format!("invalid address: {addr:?}")))
}

fn resolve_port(raw: &str, protocol: Protocol) -> ProxyResult<u16> {
    if let Ok(n) = raw.parse::<u32>() {
        if n == 0 || n > 65535 {
            return Err(ProxyError::parameter(format!("port out of range: {raw}")));
        }
        return Ok(n as u16);
    }
    lookup_service(raw, protocol)
        .ok_or_else(|| ProxyError::parameter(format!("unknown service name: {raw:?}")))
}

/// Resolves a symbolic service name (e.g. `"https"`) against `/etc/services`
/// semantics for the given protocol. Kept deliberately small: only a
/// handful of services matter to this daemon's callers.
fn lookup_service(name: &str, protocol: Protocol) -> Option<u16> {
    let proto = protocol.service_proto();
    match (name, proto) {
        ("cql" | "cassandra", _) => Some(9042),
        ("http", "tcp") => Some(80),
        ("https", "tcp") => Some(443),
        _ => None,
    }
}

fn classify_v6(addr: Ipv6Addr) -> EndpointClass {
    if let Some(v4) = addr.to_ipv4_mapped() {
        return classify_v4(v4);
    }
    let segs = addr.segments();
    if addr.is_unspecified() {
        return EndpointClass::Any;
    }
    if addr.is_loopback() || (segs[0] & 0xff0f) == 0xff01 {
        return EndpointClass::Loopback;
    }
    // fd00::/8 - unique local (treated as private)
    if (segs[0] & 0xff00) == 0xfc00 || (segs[0] & 0xfe00) == 0xfc00 {
        return EndpointClass::Private;
    }
    // fe80::/10 - link-local unicast
    if (segs[0] & 0xffc0) == 0xfe80 {
        return EndpointClass::LinkLocal;
    }
    // ffx2:: - link-local multicast scope
    if segs[0] & 0xff0f == 0xff02 {
        return EndpointClass::LinkLocal;
    }
    // ff00::/8 - multicast
    if (segs[0] & 0xff00) == 0xff00 {
        return EndpointClass::Multicast;
    }
    EndpointClass::Public
}

fn classify_v4(addr: Ipv4Addr) -> EndpointClass {
    let o = addr.octets();
    if addr.is_unspecified() {
        return EndpointClass::Any;
    }
    if o[0] == 127 {
        return EndpointClass::Loopback;
    }
    if o[0] == 10 {
        return EndpointClass::Private;
    }
    if o[0] == 172 && (16..=31).contains(&o[1]) {
        return EndpointClass::Private;
    }
    if o[0] == 192 && o[1] == 168 {
        return EndpointClass::Private;
    }
    if o[0] == 100 && (64..=127).contains(&o[1]) {
        return EndpointClass::Carrier;
    }
    if o[0] == 169 && o[1] == 254 {
        return EndpointClass::LinkLocal;
    }
    if (224..=239).contains(&o[0]) {
        return EndpointClass::Multicast;
    }
    EndpointClass::Public
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ipv4() {
        let e = Endpoint::parse("192.168.1.2:4042", None, None, Protocol::Tcp).unwrap();
        assert_eq!(e.to_string(), "192.168.1.2:4042");
        assert_eq!(e.classify(), EndpointClass::Private);
    }

    #[test]
    fn round_trips_ipv6_brackets() {
        let e = Endpoint::parse("[::1]:9042", None, None, Protocol::Tcp).unwrap();
        assert_eq!(e.port(), Some(9042));
        assert_eq!(e.classify(), EndpointClass::Loopback);
    }

    #[test]
    fn link_local_v4() {
        let e = Endpoint::parse("169.254.1.2:80", None, None, Protocol::Tcp).unwrap();
        assert_eq!(e.classify(), EndpointClass::LinkLocal);
    }

    #[test]
    fn loopback_multicast_scope_is_not_confused_with_multicast() {
        let e = Endpoint::parse("[ff11::1]:9042", None, None, Protocol::Tcp).unwrap();
        assert_eq!(e.classify(), EndpointClass::Loopback);
        let e = Endpoint::parse("[ff12::1]:9042", None, None, Protocol::Tcp).unwrap();
        assert_eq!(e.classify(), EndpointClass::Multicast);
    }

    #[test]
    fn missing_port_with_no_default_is_a_parameter_error() {
        let err = Endpoint::parse("[::1]", None, None, Protocol::Tcp).unwrap_err();
        assert!(matches!(err, ProxyError::Parameter(_)));
    }

    #[test]
    fn rejects_bracketed_ipv4() {
        let err = Endpoint::parse("[127.0.0.1]:80", None, None, Protocol::Tcp).unwrap_err();
        assert!(matches!(err, ProxyError::Parameter(_)));
    }

    #[test]
    fn rejects_out_of_range_port() {
        assert!(Endpoint::parse("127.0.0.1:0", None, None, Protocol::Tcp).is_err());
        assert!(Endpoint::parse("127.0.0.1:65536", None, None, Protocol::Tcp).is_err());
    }

    #[test]
    fn ordering_ignores_port_and_protocol() {
        let a = Endpoint::parse("10.0.0.1:1", None, None, Protocol::Tcp).unwrap();
        let b = Endpoint::parse("10.0.0.1:2", None, None, Protocol::Udp).unwrap();
        assert_eq!(a, b);
    }
}
