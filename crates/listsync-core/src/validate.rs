//! Kind compatibility checks
//!
//! An item may only be added to a list of the same kind. These checks run
//! before any mutating remote call so a rejected combination never leaves
//! partial remote state behind.

use crate::error::{Error, Result};
use crate::model::{DesiredItem, ListKind};

/// Check that an item of `item_kind` may be added to a list of `list_kind`
pub fn check_kind(item_kind: ListKind, list_kind: ListKind) -> Result<()> {
    if item_kind == list_kind {
        Ok(())
    } else {
        Err(Error::kind_mismatch(item_kind, list_kind))
    }
}

/// Validate a desired item against its list's declared kind
pub fn validate(desired: &DesiredItem, list_kind: ListKind) -> Result<()> {
    check_kind(desired.payload.kind(), list_kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KIND_MISMATCH_PHRASE;

    #[test]
    fn test_every_kind_pair() {
        for item_kind in ListKind::ALL {
            for list_kind in ListKind::ALL {
                let result = check_kind(item_kind, list_kind);
                if item_kind == list_kind {
                    assert!(result.is_ok(), "{} into {} should pass", item_kind, list_kind);
                } else {
                    let msg = result.unwrap_err().to_string();
                    assert!(msg.contains(KIND_MISMATCH_PHRASE.trim()), "unexpected message: {}", msg);
                    assert!(msg.starts_with(item_kind.as_str()));
                    assert!(msg.ends_with(list_kind.as_str()));
                }
            }
        }
    }
}
