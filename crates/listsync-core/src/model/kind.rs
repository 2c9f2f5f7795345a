use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared kind of a list, and the kind of each item variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    /// IP addresses and CIDR blocks
    Ip,
    /// Autonomous system numbers
    Asn,
    /// URL hostnames
    Hostname,
    /// Bulk redirect rules
    Redirect,
}

impl ListKind {
    /// All kinds, in declaration order
    pub const ALL: [ListKind; 4] = [
        ListKind::Ip,
        ListKind::Asn,
        ListKind::Hostname,
        ListKind::Redirect,
    ];

    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Ip => "ip",
            ListKind::Asn => "asn",
            ListKind::Hostname => "hostname",
            ListKind::Redirect => "redirect",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip" => Ok(ListKind::Ip),
            "asn" => Ok(ListKind::Asn),
            "hostname" => Ok(ListKind::Hostname),
            "redirect" => Ok(ListKind::Redirect),
            other => Err(crate::Error::config(format!(
                "Unknown list kind '{}'. Valid kinds: ip, asn, hostname, redirect",
                other
            ))),
        }
    }
}
