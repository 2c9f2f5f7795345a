//! Cloudflare API v4 request and response bodies for account lists

use chrono::{DateTime, Utc};
use listsync_core::model::{ItemPayload, List, ListItem, ListKind, NewItem, RawItem};
use listsync_core::traits::OperationStatus;
use listsync_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Standard response envelope
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
    pub result: Option<T>,
    #[serde(default)]
    pub result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiMessage {
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ResultInfo {
    #[serde(default)]
    pub cursors: Option<Cursors>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Cursors {
    #[serde(default)]
    pub after: Option<String>,
}

impl<T> Envelope<T> {
    /// Join the error messages the way the dashboard shows them
    pub(crate) fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub(crate) fn next_cursor(&self) -> Option<&str> {
        self.result_info
            .as_ref()
            .and_then(|info| info.cursors.as_ref())
            .and_then(|cursors| cursors.after.as_deref())
            .filter(|cursor| !cursor.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireList {
    pub id: String,
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

impl WireList {
    pub(crate) fn into_list(self, account_id: &str) -> List {
        List {
            id: self.id,
            account_id: account_id.to_string(),
            name: self.name,
            description: self.description,
            kind: self.kind,
            num_items: self.num_items,
            created_on: self.created_on,
            modified_on: self.modified_on,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireItem {
    pub id: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(flatten)]
    pub fields: RawItem,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl TryFrom<WireItem> for ListItem {
    type Error = Error;

    fn try_from(item: WireItem) -> Result<Self> {
        let payload = ItemPayload::from_raw(&item.fields)
            .map_err(|e| Error::Other(format!("Unexpected list item {} in response: {}", item.id, e)))?;
        Ok(ListItem {
            id: item.id,
            comment: item.comment.filter(|c| !c.is_empty()),
            payload,
            created_on: item.created_on,
            modified_on: item.modified_on,
        })
    }
}

/// One element of the POST /items body
#[derive(Debug, Serialize)]
pub(crate) struct WireNewItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(flatten)]
    pub fields: RawItem,
}

impl From<&NewItem> for WireNewItem {
    fn from(item: &NewItem) -> Self {
        Self {
            comment: item.comment.clone(),
            fields: item.payload.to_raw(),
        }
    }
}

/// Body of DELETE /items
#[derive(Debug, Serialize)]
pub(crate) struct WireDeleteItems {
    pub items: Vec<WireItemRef>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WireItemRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireOperationRef {
    pub operation_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireOperation {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<WireOperation> for OperationStatus {
    fn from(op: WireOperation) -> Self {
        match op.status.as_str() {
            "completed" => OperationStatus::Completed,
            "failed" => OperationStatus::Failed {
                error: op.error.unwrap_or_else(|| "operation failed".to_string()),
            },
            "running" => OperationStatus::Running,
            _ => OperationStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_with_hostname_parses() {
        let json = serde_json::json!({
            "id": "2c0fc9fa937b11eaa1b71c4d701ab86e",
            "hostname": { "url_hostname": "example.com", "exclude_exact_hostname": true },
            "comment": "",
            "created_on": "2020-01-01T08:00:00Z",
            "modified_on": "2020-01-10T14:00:00Z"
        });
        let wire: WireItem = serde_json::from_value(json).unwrap();
        let item = ListItem::try_from(wire).unwrap();

        assert_eq!(item.comment, None);
        assert_eq!(item.payload.kind(), ListKind::Hostname);
        assert_eq!(item.payload.search_key(), "example.com");
    }

    #[test]
    fn test_new_item_body_is_flat() {
        let item = NewItem {
            comment: Some("office".to_string()),
            payload: ItemPayload::ip("192.0.2.0/24").unwrap(),
        };
        let body = serde_json::to_value(vec![WireNewItem::from(&item)]).unwrap();
        assert_eq!(
            body,
            serde_json::json!([{ "ip": "192.0.2.0/24", "comment": "office" }])
        );
    }

    #[test]
    fn test_operation_status_mapping() {
        let failed = WireOperation {
            status: "failed".to_string(),
            error: Some("ip can not be added to lists of type asn".to_string()),
        };
        assert!(matches!(
            OperationStatus::from(failed),
            OperationStatus::Failed { error } if error.contains("lists of type asn")
        ));

        let pending = WireOperation {
            status: "pending".to_string(),
            error: None,
        };
        assert_eq!(OperationStatus::from(pending), OperationStatus::Pending);
    }

    #[test]
    fn test_next_cursor_ignores_empty() {
        let envelope: Envelope<Vec<serde_json::Value>> = serde_json::from_value(serde_json::json!({
            "success": true,
            "errors": [],
            "result": [],
            "result_info": { "cursors": { "after": "" } }
        }))
        .unwrap();
        assert_eq!(envelope.next_cursor(), None);
    }
}
