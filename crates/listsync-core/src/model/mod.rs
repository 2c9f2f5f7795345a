//! Item payload model
//!
//! - [`ItemPayload`]: exactly one validated variant (IP, ASN, hostname, redirect)
//! - [`ListKind`]: the kind tag shared by lists and item variants
//! - [`ListItem`], [`List`]: remote records
//! - [`DesiredItem`]: a declared item after validation

pub mod item;
pub mod kind;
pub mod payload;

pub use item::{DesiredItem, ItemPatch, ItemTarget, List, ListItem, NewItem, normalize_comment};
pub use kind::ListKind;
pub use payload::{
    Hostname, IpEntry, ItemPayload, RawHostname, RawItem, RawRedirect, Redirect, RedirectStatus,
};
