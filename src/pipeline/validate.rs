//! URL safety validation (SSRF policy).
//!
//! A caller-supplied URL is classified as fetchable or rejected before any
//! network traffic happens. Checks run in a fixed order and the first failing
//! check decides the reason:
//!
//! 1. the URL parses and its scheme is in the allowed set
//! 2. it has a host
//! 3. the host is not a blocked literal (case-insensitive)
//! 4. a literal IP host is not private, loopback, link-local, unspecified,
//!    or inside a configured CIDR range
//! 5. a domain host contains none of the blocked substrings
//!
//! No DNS lookup is performed. A public name that resolves to a private
//! address passes step 5; see DESIGN.md.

use crate::config::ConversionConfig;
use crate::error::Url2PdfError;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// An absolute URL that passed the safety policy. Immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl(Url);

impl TargetUrl {
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }

    pub fn path(&self) -> &str {
        self.0.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.0.query()
    }
}

#[cfg(test)]
impl TargetUrl {
    /// Skip the policy, for tests that talk to a loopback server.
    pub(crate) fn unchecked(url: Url) -> Self {
        TargetUrl(url)
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Why a URL was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Not a parseable absolute URL.
    Malformed(String),
    SchemeNotAllowed(String),
    MissingHost,
    BlockedHost(String),
    /// Literal IP in a reserved class (`kind` names the class).
    ReservedAddress { ip: IpAddr, kind: &'static str },
    BlockedRange { ip: IpAddr, cidr: String },
    BlockedPattern { host: String, pattern: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Malformed(reason) => write!(f, "{reason}"),
            Rejection::SchemeNotAllowed(s) => write!(f, "scheme '{s}' is not allowed"),
            Rejection::MissingHost => write!(f, "URL has no host"),
            Rejection::BlockedHost(h) => write!(f, "host '{h}' is blocked"),
            Rejection::ReservedAddress { ip, kind } => write!(f, "{ip} is a {kind} address"),
            Rejection::BlockedRange { ip, cidr } => write!(f, "{ip} is inside blocked range {cidr}"),
            Rejection::BlockedPattern { host, pattern } => {
                write!(f, "host '{host}' matches blocked pattern '{pattern}'")
            }
        }
    }
}

impl Rejection {
    /// Structural problems are invalid input; everything else is a policy
    /// rejection.
    pub fn into_error(self, input: &str) -> Url2PdfError {
        match self {
            Rejection::Malformed(reason) => Url2PdfError::InvalidUrl {
                input: input.to_string(),
                reason,
            },
            other => Url2PdfError::UnsafeUrl {
                url: input.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// An IP network in CIDR notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
    text: String,
}

impl Cidr {
    pub fn parse(text: &str) -> Option<Cidr> {
        let text = text.trim();
        let (addr, prefix) = text.split_once('/')?;
        let network = addr.parse::<IpAddr>().ok()?;
        let prefix = prefix.parse::<u8>().ok()?;
        match network {
            IpAddr::V4(_) if prefix > 32 => return None,
            IpAddr::V6(_) if prefix > 128 => return None,
            _ => {}
        }
        Some(Cidr {
            network,
            prefix,
            text: text.to_string(),
        })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (ip, self.network) {
            (IpAddr::V4(ip), IpAddr::V4(net)) => prefix_match(&ip.octets(), &net.octets(), self.prefix),
            (IpAddr::V6(ip), IpAddr::V6(net)) => prefix_match(&ip.octets(), &net.octets(), self.prefix),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

fn prefix_match(ip: &[u8], net: &[u8], prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let full = (prefix / 8) as usize;
    let rem = prefix % 8;

    if ip.len() < full || net.len() < full || ip[..full] != net[..full] {
        return false;
    }
    if rem == 0 {
        return true;
    }
    let mask = 0xFFu8 << (8 - rem);
    ip[full] & mask == net[full] & mask
}

/// The SSRF policy. Cheap to clone; shared by the assembler and the
/// per-render resource resolver.
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    allowed_schemes: Vec<String>,
    blocked_hosts: Vec<String>,
    blocked_cidrs: Vec<Cidr>,
    blocked_patterns: Vec<String>,
}

impl UrlPolicy {
    pub fn from_config(config: &ConversionConfig) -> Result<Self, Url2PdfError> {
        let blocked_cidrs = config
            .blocked_cidrs
            .iter()
            .map(|c| {
                Cidr::parse(c).ok_or_else(|| {
                    Url2PdfError::InvalidConfig(format!("Invalid blocked CIDR range '{c}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            allowed_schemes: lowercase_all(&config.allowed_schemes),
            blocked_hosts: config
                .blocked_hosts
                .iter()
                .map(|h| normalize_host(h))
                .collect(),
            blocked_cidrs,
            blocked_patterns: lowercase_all(&config.blocked_host_patterns),
        })
    }

    /// Classify `input`. Any parse failure is a rejection.
    pub fn validate(&self, input: &str) -> Result<TargetUrl, Rejection> {
        let url = Url::parse(input.trim()).map_err(|e| Rejection::Malformed(e.to_string()))?;

        // (a) scheme
        if !self.allowed_schemes.iter().any(|s| s == url.scheme()) {
            return Err(Rejection::SchemeNotAllowed(url.scheme().to_string()));
        }

        // (b) host
        let host = match url.host() {
            Some(h) => h,
            None => return Err(Rejection::MissingHost),
        };
        let host_text = normalize_host(&host.to_string());
        if host_text.is_empty() {
            return Err(Rejection::MissingHost);
        }

        // (c) blocked literal
        if self.blocked_hosts.iter().any(|b| *b == host_text) {
            return Err(Rejection::BlockedHost(host_text));
        }

        match host {
            // (d) literal address
            Host::Ipv4(v4) => self.check_ip(IpAddr::V4(v4))?,
            Host::Ipv6(v6) => self.check_ip(IpAddr::V6(v6))?,
            // (e) textual patterns
            Host::Domain(_) => {
                if let Some(p) = self.blocked_patterns.iter().find(|p| host_text.contains(p.as_str())) {
                    return Err(Rejection::BlockedPattern {
                        host: host_text,
                        pattern: p.clone(),
                    });
                }
            }
        }

        Ok(TargetUrl(url))
    }

    fn check_ip(&self, ip: IpAddr) -> Result<(), Rejection> {
        if let Some(kind) = reserved_kind(ip) {
            return Err(Rejection::ReservedAddress { ip, kind });
        }
        let mapped = canonical_ip(ip);
        for cidr in &self.blocked_cidrs {
            if cidr.contains(ip) || cidr.contains(mapped) {
                return Err(Rejection::BlockedRange {
                    ip,
                    cidr: cidr.as_str().to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for UrlPolicy {
    fn default() -> Self {
        // The default CIDR list is static and always parses.
        Self::from_config(&ConversionConfig::default()).unwrap_or(Self {
            allowed_schemes: vec!["http".into(), "https".into()],
            blocked_hosts: Vec::new(),
            blocked_cidrs: Vec::new(),
            blocked_patterns: Vec::new(),
        })
    }
}

fn lowercase_all(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Lowercase, strip IPv6 brackets and a trailing root dot.
fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

/// IPv4-mapped IPv6 addresses are judged as the IPv4 address they carry.
fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

fn reserved_kind(ip: IpAddr) -> Option<&'static str> {
    match canonical_ip(ip) {
        IpAddr::V4(v4) => reserved_v4(v4),
        IpAddr::V6(v6) => reserved_v6(v6),
    }
}

fn reserved_v4(ip: Ipv4Addr) -> Option<&'static str> {
    if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_private() {
        Some("private")
    } else if ip.is_link_local() {
        Some("link-local")
    } else if ip.is_unspecified() {
        Some("unspecified")
    } else if ip.is_broadcast() {
        Some("broadcast")
    } else {
        None
    }
}

fn reserved_v6(ip: Ipv6Addr) -> Option<&'static str> {
    let first = ip.segments()[0];
    if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_unspecified() {
        Some("unspecified")
    } else if first & 0xfe00 == 0xfc00 {
        Some("unique-local")
    } else if first & 0xffc0 == 0xfe80 {
        Some("link-local")
    } else {
        None
    }
}
