// # Item Payloads
//
// An item carries exactly one of four payload shapes. Declared configuration
// and remote responses both arrive as a `RawItem` (every variant optional);
// `ItemPayload::from_raw` is the single place that turns those loose fields
// into a validated variant.
//
// ## Wire shape
//
// ```json
// { "ip": "192.0.2.0/24" }
// { "asn": 13335 }
// { "hostname": { "url_hostname": "example.com" } }
// { "redirect": { "source_url": "example.com/", "target_url": "https://example1.com", "status_code": 301 } }
// ```

use crate::error::{Error, Result};
use crate::model::ListKind;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Maximum length of a hostname (RFC 1035)
const MAX_HOSTNAME_LEN: usize = 253;

/// Maximum length of a single hostname label
const MAX_LABEL_LEN: usize = 63;

/// Loosely-typed item fields as declared in configuration or returned remotely
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<RawHostname>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<RawRedirect>,
}

/// Hostname block as declared
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHostname {
    pub url_hostname: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_exact_hostname: Option<bool>,
}

/// Redirect block as declared
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRedirect {
    pub source_url: String,
    pub target_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_subdomains: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subpath_matching: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_query_string: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_path_suffix: Option<bool>,
}

/// A single IP address or a CIDR block
///
/// A CIDR whose prefix covers the whole address (`/32`, `/128`) is stored as
/// the bare address, so `192.0.2.0/32` and `192.0.2.0` are the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpEntry {
    Address(IpAddr),
    Network(IpNet),
}

impl FromStr for IpEntry {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.contains('/') {
            let net: IpNet = s
                .parse()
                .map_err(|e| Error::malformed(format!("invalid CIDR '{}': {}", s, e)))?;
            if net.prefix_len() == net.max_prefix_len() {
                return Ok(IpEntry::Address(net.addr()));
            }
            if net.trunc() != net {
                return Err(Error::malformed(format!(
                    "CIDR '{}' has host bits set, expected {}",
                    s,
                    net.trunc()
                )));
            }
            Ok(IpEntry::Network(net))
        } else {
            s.parse::<IpAddr>()
                .map(IpEntry::Address)
                .map_err(|e| Error::malformed(format!("invalid IP address '{}': {}", s, e)))
        }
    }
}

impl fmt::Display for IpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpEntry::Address(addr) => write!(f, "{}", addr),
            IpEntry::Network(net) => write!(f, "{}", net),
        }
    }
}

/// HTTP status codes a redirect item may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RedirectStatus {
    #[default]
    MovedPermanently,
    Found,
    TemporaryRedirect,
    PermanentRedirect,
}

impl RedirectStatus {
    pub fn code(&self) -> u16 {
        match self {
            RedirectStatus::MovedPermanently => 301,
            RedirectStatus::Found => 302,
            RedirectStatus::TemporaryRedirect => 307,
            RedirectStatus::PermanentRedirect => 308,
        }
    }
}

impl TryFrom<u16> for RedirectStatus {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self> {
        match code {
            301 => Ok(RedirectStatus::MovedPermanently),
            302 => Ok(RedirectStatus::Found),
            307 => Ok(RedirectStatus::TemporaryRedirect),
            308 => Ok(RedirectStatus::PermanentRedirect),
            other => Err(Error::malformed(format!(
                "redirect status_code {} is not one of 301, 302, 307, 308",
                other
            ))),
        }
    }
}

/// Validated hostname entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hostname {
    url_hostname: String,
    exclude_exact_hostname: Option<bool>,
}

impl Hostname {
    pub fn new(url_hostname: &str, exclude_exact_hostname: Option<bool>) -> Result<Self> {
        let url_hostname = url_hostname.trim().to_ascii_lowercase();
        let bare = url_hostname.strip_prefix("*.").unwrap_or(&url_hostname);
        validate_hostname(bare)
            .map_err(|reason| Error::malformed(format!("url_hostname '{}' {}", url_hostname, reason)))?;
        Ok(Self {
            url_hostname,
            exclude_exact_hostname,
        })
    }

    pub fn url_hostname(&self) -> &str {
        &self.url_hostname
    }

    pub fn exclude_exact_hostname(&self) -> Option<bool> {
        self.exclude_exact_hostname
    }

    fn matches(&self, other: &Hostname) -> bool {
        self.url_hostname == other.url_hostname
            && self.exclude_exact_hostname.unwrap_or(false)
                == other.exclude_exact_hostname.unwrap_or(false)
    }
}

/// Validated redirect rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    source_url: String,
    target_url: String,
    status_code: RedirectStatus,
    include_subdomains: Option<bool>,
    subpath_matching: Option<bool>,
    preserve_query_string: Option<bool>,
    preserve_path_suffix: Option<bool>,
}

impl Redirect {
    /// Build a redirect with no optional flags set
    pub fn new(
        source_url: &str,
        target_url: &str,
        status_code: RedirectStatus,
    ) -> Result<Self> {
        Self::from_raw(&RawRedirect {
            source_url: source_url.to_string(),
            target_url: target_url.to_string(),
            status_code: Some(status_code.code()),
            ..Default::default()
        })
    }

    fn from_raw(raw: &RawRedirect) -> Result<Self> {
        let source_url = raw.source_url.trim();
        validate_source_url(source_url)?;

        let target_url = raw.target_url.trim();
        let parsed = url::Url::parse(target_url).map_err(|e| {
            Error::malformed(format!("redirect target_url '{}' is not a URL: {}", target_url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(Error::malformed(format!(
                "redirect target_url '{}' must be an absolute http or https URL",
                target_url
            )));
        }

        let status_code = match raw.status_code {
            Some(code) => RedirectStatus::try_from(code)?,
            None => RedirectStatus::default(),
        };

        Ok(Self {
            source_url: source_url.to_string(),
            target_url: target_url.to_string(),
            status_code,
            include_subdomains: raw.include_subdomains,
            subpath_matching: raw.subpath_matching,
            preserve_query_string: raw.preserve_query_string,
            preserve_path_suffix: raw.preserve_path_suffix,
        })
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn status_code(&self) -> RedirectStatus {
        self.status_code
    }

    pub fn with_include_subdomains(mut self, value: bool) -> Self {
        self.include_subdomains = Some(value);
        self
    }

    pub fn with_subpath_matching(mut self, value: bool) -> Self {
        self.subpath_matching = Some(value);
        self
    }

    pub fn with_preserve_query_string(mut self, value: bool) -> Self {
        self.preserve_query_string = Some(value);
        self
    }

    pub fn with_preserve_path_suffix(mut self, value: bool) -> Self {
        self.preserve_path_suffix = Some(value);
        self
    }

    fn to_raw(&self) -> RawRedirect {
        RawRedirect {
            source_url: self.source_url.clone(),
            target_url: self.target_url.clone(),
            status_code: Some(self.status_code.code()),
            include_subdomains: self.include_subdomains,
            subpath_matching: self.subpath_matching,
            preserve_query_string: self.preserve_query_string,
            preserve_path_suffix: self.preserve_path_suffix,
        }
    }

    // Unset flags take the remote default (false).
    fn matches(&self, other: &Redirect) -> bool {
        let flag = |v: Option<bool>| v.unwrap_or(false);
        self.source_url == other.source_url
            && self.target_url == other.target_url
            && self.status_code == other.status_code
            && flag(self.include_subdomains) == flag(other.include_subdomains)
            && flag(self.subpath_matching) == flag(other.subpath_matching)
            && flag(self.preserve_query_string) == flag(other.preserve_query_string)
            && flag(self.preserve_path_suffix) == flag(other.preserve_path_suffix)
    }
}

/// Exactly one validated item variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemPayload {
    Ip(IpEntry),
    Asn(u32),
    Hostname(Hostname),
    Redirect(Redirect),
}

impl ItemPayload {
    /// Validate raw fields into a single variant
    ///
    /// Fails with [`Error::MalformedPayload`] when no variant or more than one
    /// variant is populated, or when the populated variant is invalid.
    pub fn from_raw(raw: &RawItem) -> Result<Self> {
        let populated: Vec<&str> = [
            raw.ip.as_ref().map(|_| "ip"),
            raw.asn.as_ref().map(|_| "asn"),
            raw.hostname.as_ref().map(|_| "hostname"),
            raw.redirect.as_ref().map(|_| "redirect"),
        ]
        .into_iter()
        .flatten()
        .collect();

        match populated.len() {
            0 => {
                return Err(Error::malformed(
                    "exactly one of ip, asn, hostname or redirect must be set",
                ));
            }
            1 => {}
            _ => {
                return Err(Error::malformed(format!(
                    "only one of ip, asn, hostname or redirect may be set, got {}",
                    populated.join(", ")
                )));
            }
        }

        if let Some(ip) = &raw.ip {
            return Ok(ItemPayload::Ip(ip.parse()?));
        }
        if let Some(asn) = raw.asn {
            return Self::asn(asn);
        }
        if let Some(hostname) = &raw.hostname {
            return Ok(ItemPayload::Hostname(Hostname::new(
                &hostname.url_hostname,
                hostname.exclude_exact_hostname,
            )?));
        }
        match &raw.redirect {
            Some(redirect) => Ok(ItemPayload::Redirect(Redirect::from_raw(redirect)?)),
            None => Err(Error::malformed("no item variant populated")),
        }
    }

    /// Build an IP payload from an address or CIDR string
    pub fn ip(value: &str) -> Result<Self> {
        Ok(ItemPayload::Ip(value.parse()?))
    }

    /// Build an ASN payload, rejecting non-positive or out-of-range numbers
    pub fn asn(value: i64) -> Result<Self> {
        match u32::try_from(value) {
            Ok(asn) if asn > 0 => Ok(ItemPayload::Asn(asn)),
            _ => Err(Error::malformed(format!(
                "asn {} must be a positive integer no larger than {}",
                value,
                u32::MAX
            ))),
        }
    }

    /// Build a hostname payload
    pub fn hostname(url_hostname: &str) -> Result<Self> {
        Ok(ItemPayload::Hostname(Hostname::new(url_hostname, None)?))
    }

    /// Kind of list this payload belongs in
    pub fn kind(&self) -> ListKind {
        match self {
            ItemPayload::Ip(_) => ListKind::Ip,
            ItemPayload::Asn(_) => ListKind::Asn,
            ItemPayload::Hostname(_) => ListKind::Hostname,
            ItemPayload::Redirect(_) => ListKind::Redirect,
        }
    }

    /// Content string the remote search filter matches on
    pub fn search_key(&self) -> String {
        match self {
            ItemPayload::Ip(ip) => ip.to_string(),
            ItemPayload::Asn(asn) => asn.to_string(),
            ItemPayload::Hostname(hostname) => hostname.url_hostname.clone(),
            ItemPayload::Redirect(redirect) => redirect.source_url.clone(),
        }
    }

    /// Whether two payloads describe the same remote entry
    ///
    /// Optional flags left unset compare equal to their remote default.
    pub fn matches(&self, other: &ItemPayload) -> bool {
        match (self, other) {
            (ItemPayload::Hostname(a), ItemPayload::Hostname(b)) => a.matches(b),
            (ItemPayload::Redirect(a), ItemPayload::Redirect(b)) => a.matches(b),
            (a, b) => a == b,
        }
    }

    /// Convert back to loose fields (used for the wire and for state files)
    pub fn to_raw(&self) -> RawItem {
        match self {
            ItemPayload::Ip(ip) => RawItem {
                ip: Some(ip.to_string()),
                ..Default::default()
            },
            ItemPayload::Asn(asn) => RawItem {
                asn: Some(i64::from(*asn)),
                ..Default::default()
            },
            ItemPayload::Hostname(hostname) => RawItem {
                hostname: Some(RawHostname {
                    url_hostname: hostname.url_hostname.clone(),
                    exclude_exact_hostname: hostname.exclude_exact_hostname,
                }),
                ..Default::default()
            },
            ItemPayload::Redirect(redirect) => RawItem {
                redirect: Some(redirect.to_raw()),
                ..Default::default()
            },
        }
    }
}

impl fmt::Display for ItemPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemPayload::Ip(ip) => write!(f, "ip {}", ip),
            ItemPayload::Asn(asn) => write!(f, "asn {}", asn),
            ItemPayload::Hostname(h) => write!(f, "hostname {}", h.url_hostname),
            ItemPayload::Redirect(r) => write!(
                f,
                "redirect {} -> {} ({})",
                r.source_url,
                r.target_url,
                r.status_code.code()
            ),
        }
    }
}

impl Serialize for ItemPayload {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_raw().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ItemPayload {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawItem::deserialize(deserializer)?;
        ItemPayload::from_raw(&raw).map_err(serde::de::Error::custom)
    }
}

/// Check URL-hostname syntax (labels of alphanumerics and hyphens)
fn validate_hostname(host: &str) -> std::result::Result<(), String> {
    if host.is_empty() {
        return Err("is empty".to_string());
    }
    if host.len() > MAX_HOSTNAME_LEN {
        return Err(format!("is longer than {} characters", MAX_HOSTNAME_LEN));
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 {
        return Err("must contain at least two labels".to_string());
    }

    for label in labels {
        if label.is_empty() {
            return Err("has an empty label".to_string());
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(format!("has a label longer than {} characters", MAX_LABEL_LEN));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(format!("label '{}' has invalid characters", label));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("label '{}' starts or ends with a hyphen", label));
        }
    }

    Ok(())
}

/// Redirect sources are scheme-less: `host[/path]`
fn validate_source_url(source: &str) -> Result<()> {
    if source.is_empty() {
        return Err(Error::malformed("redirect source_url cannot be empty"));
    }
    if source.contains("://") {
        return Err(Error::malformed(format!(
            "redirect source_url '{}' must not include a scheme",
            source
        )));
    }
    if source.contains('?') || source.contains('#') {
        return Err(Error::malformed(format!(
            "redirect source_url '{}' must not include a query or fragment",
            source
        )));
    }

    let parsed = url::Url::parse(&format!("https://{}", source)).map_err(|e| {
        Error::malformed(format!("redirect source_url '{}' is not a URL: {}", source, e))
    })?;
    let host = parsed.host_str().unwrap_or_default();
    validate_hostname(host).map_err(|reason| {
        Error::malformed(format!("redirect source_url host '{}' {}", host, reason))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_ip(ip: &str) -> RawItem {
        RawItem {
            ip: Some(ip.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_host_cidr_collapses_to_address() {
        let a = ItemPayload::from_raw(&raw_ip("192.0.2.0/32")).unwrap();
        let b = ItemPayload::from_raw(&raw_ip("192.0.2.0")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.search_key(), "192.0.2.0");
    }

    #[test]
    fn test_cidr_with_host_bits_rejected() {
        let err = ItemPayload::from_raw(&raw_ip("192.0.2.1/24")).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
        assert!(err.to_string().contains("192.0.2.0/24"));
    }

    #[test]
    fn test_ipv6_network() {
        let payload = ItemPayload::ip("2001:db8::/64").unwrap();
        assert_eq!(payload.to_string(), "ip 2001:db8::/64");
        assert_eq!(payload.kind(), ListKind::Ip);
    }

    #[test]
    fn test_invalid_ip_rejected() {
        assert!(ItemPayload::ip("192.0.2.256").is_err());
        assert!(ItemPayload::ip("not-an-ip").is_err());
    }

    #[test]
    fn test_no_variant_rejected() {
        let err = ItemPayload::from_raw(&RawItem::default()).unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn test_multiple_variants_rejected() {
        let raw = RawItem {
            ip: Some("192.0.2.0".to_string()),
            asn: Some(1),
            ..Default::default()
        };
        let err = ItemPayload::from_raw(&raw).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
        assert!(err.to_string().contains("ip, asn"));
    }

    #[test]
    fn test_asn_bounds() {
        assert_eq!(ItemPayload::asn(1).unwrap(), ItemPayload::Asn(1));
        assert!(ItemPayload::asn(0).is_err());
        assert!(ItemPayload::asn(-5).is_err());
        assert!(ItemPayload::asn(i64::from(u32::MAX) + 1).is_err());
    }

    #[test]
    fn test_hostname_validation() {
        assert!(ItemPayload::hostname("example.com").is_ok());
        assert!(ItemPayload::hostname("*.example.com").is_ok());
        assert!(ItemPayload::hostname("Example.COM").is_ok());
        assert!(ItemPayload::hostname("localhost").is_err());
        assert!(ItemPayload::hostname("-bad.example.com").is_err());
        assert!(ItemPayload::hostname("exa mple.com").is_err());
        assert!(ItemPayload::hostname("https://example.com").is_err());
    }

    #[test]
    fn test_hostname_normalized_lowercase() {
        let payload = ItemPayload::hostname("Example.COM").unwrap();
        assert_eq!(payload.search_key(), "example.com");
    }

    #[test]
    fn test_redirect_defaults_to_301() {
        let raw = RawItem {
            redirect: Some(RawRedirect {
                source_url: "example.com/".to_string(),
                target_url: "https://example1.com".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let ItemPayload::Redirect(redirect) = ItemPayload::from_raw(&raw).unwrap() else {
            panic!("expected redirect payload");
        };
        assert_eq!(redirect.status_code().code(), 301);
    }

    #[test]
    fn test_redirect_rejects_unknown_status() {
        let raw = RawItem {
            redirect: Some(RawRedirect {
                source_url: "example.com/".to_string(),
                target_url: "https://example1.com".to_string(),
                status_code: Some(303),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = ItemPayload::from_raw(&raw).unwrap_err();
        assert!(err.to_string().contains("303"));
    }

    #[test]
    fn test_redirect_url_rules() {
        let ok = Redirect::new("example.com/path", "https://example1.com/x", RedirectStatus::Found);
        assert!(ok.is_ok());
        assert!(Redirect::new("https://example.com/", "https://example1.com", RedirectStatus::Found).is_err());
        assert!(Redirect::new("example.com/", "example1.com", RedirectStatus::Found).is_err());
        assert!(Redirect::new("example.com/", "ftp://example1.com", RedirectStatus::Found).is_err());
        assert!(Redirect::new("example.com/?a=b", "https://example1.com", RedirectStatus::Found).is_err());
    }

    #[test]
    fn test_redirect_unset_flags_match_remote_defaults() {
        let declared = Redirect::new("example.com/", "https://example1.com", RedirectStatus::MovedPermanently).unwrap();
        let remote = declared.clone().with_include_subdomains(false).with_subpath_matching(false);
        let a = ItemPayload::Redirect(declared);
        let b = ItemPayload::Redirect(remote);
        assert_ne!(a, b);
        assert!(a.matches(&b));
        assert!(!a.matches(&ItemPayload::Redirect(
            Redirect::new("example.com/", "https://example1.com", RedirectStatus::MovedPermanently)
                .unwrap()
                .with_include_subdomains(true)
        )));
    }

    #[test]
    fn test_payload_serde_uses_wire_shape() {
        let payload = ItemPayload::hostname("example.com").unwrap();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({ "hostname": { "url_hostname": "example.com" } }));

        let back: ItemPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);

        let bad = serde_json::from_value::<ItemPayload>(serde_json::json!({ "ip": "1.2.3.4", "asn": 3 }));
        assert!(bad.is_err());
    }
}
