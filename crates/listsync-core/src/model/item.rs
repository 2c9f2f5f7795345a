use crate::config::ItemConfig;
use crate::error::Result;
use crate::model::{ItemPayload, ListKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote list metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct List {
    pub id: String,
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub kind: ListKind,
    #[serde(default)]
    pub num_items: u64,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

/// An item as reported by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    /// Server-assigned identifier
    pub id: String,
    pub comment: Option<String>,
    pub payload: ItemPayload,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

/// Body of a create call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub comment: Option<String>,
    pub payload: ItemPayload,
}

/// Partial update of an existing item
///
/// `None` leaves a field unchanged. `comment: Some(None)` clears the comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub comment: Option<Option<String>>,
    pub payload: Option<ItemPayload>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.comment.is_none() && self.payload.is_none()
    }
}

/// The account, list and (once known) item a remote call addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTarget<'a> {
    pub account_id: &'a str,
    pub list_id: &'a str,
    pub item_id: Option<&'a str>,
}

impl fmt::Display for ItemTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account {} / list {}", self.account_id, self.list_id)?;
        if let Some(item_id) = self.item_id {
            write!(f, " / item {}", item_id)?;
        }
        Ok(())
    }
}

/// A validated item that should exist remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredItem {
    /// Local resource name, the key under which state is tracked
    pub name: String,
    pub account_id: String,
    pub list_id: String,
    pub comment: Option<String>,
    pub payload: ItemPayload,
}

impl DesiredItem {
    pub fn new(
        name: impl Into<String>,
        account_id: impl Into<String>,
        list_id: impl Into<String>,
        payload: ItemPayload,
    ) -> Self {
        Self {
            name: name.into(),
            account_id: account_id.into(),
            list_id: list_id.into(),
            comment: None,
            payload,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = normalize_comment(Some(comment.into()));
        self
    }

    /// Validate a declared item
    pub fn from_config(config: &ItemConfig) -> Result<Self> {
        config.validate()?;
        let payload = ItemPayload::from_raw(&config.fields)?;
        Ok(Self {
            name: config.name.clone(),
            account_id: config.account_id.clone(),
            list_id: config.list_id.clone(),
            comment: normalize_comment(config.comment.clone()),
            payload,
        })
    }

    pub fn target(&self) -> ItemTarget<'_> {
        ItemTarget {
            account_id: &self.account_id,
            list_id: &self.list_id,
            item_id: None,
        }
    }

    pub fn new_item(&self) -> NewItem {
        NewItem {
            comment: self.comment.clone(),
            payload: self.payload.clone(),
        }
    }
}

/// Empty and absent comments are the same thing remotely
pub fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment.filter(|c| !c.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawItem;

    #[test]
    fn test_target_display() {
        let target = ItemTarget {
            account_id: "acc",
            list_id: "l1",
            item_id: Some("i1"),
        };
        assert_eq!(target.to_string(), "account acc / list l1 / item i1");
    }

    #[test]
    fn test_from_config_normalizes_empty_comment() {
        let config = ItemConfig {
            name: "office".to_string(),
            account_id: "acc".to_string(),
            list_id: "l1".to_string(),
            comment: Some(String::new()),
            fields: RawItem {
                ip: Some("192.0.2.0".to_string()),
                ..Default::default()
            },
        };
        let desired = DesiredItem::from_config(&config).unwrap();
        assert_eq!(desired.comment, None);
        assert_eq!(desired.payload.kind(), ListKind::Ip);
    }

    #[test]
    fn test_patch_is_empty() {
        assert!(ItemPatch::default().is_empty());
        let patch = ItemPatch {
            comment: Some(None),
            payload: None,
        };
        assert!(!patch.is_empty());
    }
}
