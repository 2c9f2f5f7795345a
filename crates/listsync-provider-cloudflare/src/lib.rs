// # Cloudflare Account Lists Client
//
// This crate provides the Cloudflare implementation of `ListApi` for listsync.
//
// ## Responsibilities
//
// - One HTTP request per trait call (update needs a read first, see below)
// - Status codes mapped to `NotFound` / `Transport` / `Rejected` so the
//   reconciler can tell "gone" from "could not find out"
// - HTTP timeout configured (30 seconds) below the reconciler's own deadline
// - NO retry or backoff (a timed-out call is abandoned by the reconciler)
// - NO polling of bulk operations (owned by `Reconciler`)
// - NO caching between calls
//
// ## Security Requirements
//
// - API token NEVER appears in logs or Debug output
// - Client construction fails fast if the token is empty
//
// ## API Reference
//
// - Cloudflare API v4: https://developers.cloudflare.com/api/
// - Get list: GET `/accounts/:account_id/rules/lists/:list_id`
// - List items: GET `/accounts/:account_id/rules/lists/:list_id/items?search=&cursor=`
// - Get item: GET `/accounts/:account_id/rules/lists/:list_id/items/:item_id`
// - Create items: POST `/accounts/:account_id/rules/lists/:list_id/items` → bulk operation
// - Delete items: DELETE `/accounts/:account_id/rules/lists/:list_id/items` → bulk operation
// - Bulk operation: GET `/accounts/:account_id/rules/lists/bulk_operations/:operation_id`
//
// Item mutations are asynchronous: the API answers with an operation id and
// applies the change in the background.

mod wire;

use async_trait::async_trait;
use listsync_core::config::ProviderConfig;
use listsync_core::model::{ItemPatch, List, ListItem, NewItem};
use listsync_core::traits::{ApplyOutcome, ListApi, ListApiFactory, OperationStatus};
use listsync_core::{ApiRegistry, Error, Result};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use wire::{
    Envelope, WireDeleteItems, WireItem, WireItemRef, WireList, WireNewItem, WireOperation,
    WireOperationRef,
};

/// Cloudflare API base URL
const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Safety net against a server that keeps returning the same cursor
const MAX_PAGES: usize = 1000;

/// Cloudflare account lists client
///
/// Stateless and single-shot. All coordination (deadlines, operation polling,
/// deciding what to change) is owned by `Reconciler`.
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the API token.
pub struct CloudflareListApi {
    /// Cloudflare API token
    /// ⚠️ NEVER log this value
    api_token: String,

    /// API base URL, without trailing slash
    base_url: String,

    /// HTTP client for API requests
    client: reqwest::Client,
}

impl std::fmt::Debug for CloudflareListApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareListApi")
            .field("api_token", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl CloudflareListApi {
    /// Create a client for the public Cloudflare API
    ///
    /// # Parameters
    ///
    /// - `api_token`: Cloudflare API token with Account Filter Lists Edit permission
    pub fn new(api_token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_token, CLOUDFLARE_API_BASE)
    }

    /// Create a client against another base URL (proxies, tests)
    pub fn with_base_url(api_token: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let api_token = api_token.into();
        if api_token.is_empty() {
            return Err(Error::config("Cloudflare API token cannot be empty"));
        }

        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::config("Cloudflare API base URL cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_token,
            base_url,
            client,
        })
    }

    fn list_path(&self, account_id: &str, list_id: &str) -> String {
        format!("{}/accounts/{}/rules/lists/{}", self.base_url, account_id, list_id)
    }

    fn items_path(&self, account_id: &str, list_id: &str) -> String {
        format!("{}/items", self.list_path(account_id, list_id))
    }

    /// Send one request and unwrap the response envelope
    ///
    /// # Error Mapping
    ///
    /// - 401/403: `Transport` (bad token or missing permission)
    /// - 404: `NotFound`
    /// - 409, 429, 5xx and network failures: `Transport`
    /// - Other 4xx and `success: false`: `Error::rejected`, which recognizes
    ///   kind mismatch messages
    async fn request<T, B>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<Envelope<T>>
    where
        T: DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        tracing::debug!("Cloudflare API request: {} {}", method, url);

        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::transport(format!("HTTP request timed out: {}", e))
            } else {
                Error::transport(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::transport(format!("Failed to read response: {}", e)))?;
        let envelope = serde_json::from_str::<Envelope<T>>(&text);

        if !status.is_success() {
            let message = envelope
                .ok()
                .and_then(|envelope| envelope.error_message())
                .unwrap_or(text);
            return Err(map_status(status, message));
        }

        let envelope = envelope.map_err(|e| {
            Error::transport(format!("Failed to parse response: {} - Body: {}", e, text))
        })?;
        if !envelope.success {
            return Err(Error::rejected(
                envelope
                    .error_message()
                    .unwrap_or_else(|| "Cloudflare reported an unsuccessful request".to_string()),
            ));
        }

        Ok(envelope)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        self.request::<T, ()>(Method::GET, url, query, None)
            .await?
            .result
            .ok_or_else(|| Error::transport("Invalid response format: missing result"))
    }

    async fn post_items(&self, account_id: &str, list_id: &str, items: &[WireNewItem]) -> Result<String> {
        let url = self.items_path(account_id, list_id);
        let operation: WireOperationRef = self
            .request::<WireOperationRef, _>(Method::POST, &url, &[], Some(items))
            .await?
            .result
            .ok_or_else(|| Error::transport("Invalid response format: missing operation id"))?;
        Ok(operation.operation_id)
    }
}

fn map_status(status: StatusCode, message: String) -> Error {
    match status.as_u16() {
        401 | 403 => Error::transport(format!(
            "Authentication failed: Invalid API token or insufficient permissions. Status: {} - {}",
            status, message
        )),
        404 => Error::not_found(message),
        409 => Error::transport(format!(
            "Conflict: the list is being modified by another operation. Status: {} - {}",
            status, message
        )),
        429 => Error::transport(format!(
            "Rate limit exceeded. Please retry later. Status: {}",
            status
        )),
        500..=599 => Error::transport(format!(
            "Cloudflare server error (transient): {} - {}",
            status, message
        )),
        _ => Error::rejected(message),
    }
}

#[async_trait]
impl ListApi for CloudflareListApi {
    /// Fetch list metadata
    ///
    /// # API Call
    ///
    /// ```http
    /// GET /accounts/:account_id/rules/lists/:list_id
    /// Authorization: Bearer <token>
    /// ```
    async fn get_list(&self, account_id: &str, list_id: &str) -> Result<List> {
        let list: WireList = self.get(&self.list_path(account_id, list_id), &[]).await?;
        tracing::debug!("List {} is of kind {}", list.id, list.kind);
        Ok(list.into_list(account_id))
    }

    /// Add one item
    ///
    /// # API Call
    ///
    /// ```http
    /// POST /accounts/:account_id/rules/lists/:list_id/items
    /// [{ "ip": "192.0.2.0/24", "comment": "office" }]
    /// ```
    async fn create_item(
        &self,
        account_id: &str,
        list_id: &str,
        item: &NewItem,
    ) -> Result<ApplyOutcome<ListItem>> {
        tracing::info!("Adding {} to Cloudflare list {}", item.payload, list_id);
        let operation_id = self
            .post_items(account_id, list_id, &[WireNewItem::from(item)])
            .await?;
        Ok(ApplyOutcome::Pending { operation_id })
    }

    async fn get_item(&self, account_id: &str, list_id: &str, item_id: &str) -> Result<ListItem> {
        let url = format!("{}/{}", self.items_path(account_id, list_id), item_id);
        let item: WireItem = self.get(&url, &[]).await?;
        ListItem::try_from(item)
    }

    /// List items, following cursor pagination
    async fn list_items(
        &self,
        account_id: &str,
        list_id: &str,
        search: Option<&str>,
    ) -> Result<Vec<ListItem>> {
        let url = self.items_path(account_id, list_id);
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut query: Vec<(&str, &str)> = Vec::new();
            if let Some(search) = search {
                query.push(("search", search));
            }
            if let Some(cursor) = cursor.as_deref() {
                query.push(("cursor", cursor));
            }

            let page: Envelope<Vec<WireItem>> = self
                .request::<Vec<WireItem>, ()>(Method::GET, &url, &query, None)
                .await?;
            let next = page.next_cursor().map(str::to_string);

            for item in page.result.unwrap_or_default() {
                items.push(ListItem::try_from(item)?);
            }

            match next {
                Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
                _ => return Ok(items),
            }
        }

        Err(Error::transport(format!(
            "List {} returned more than {} pages",
            list_id, MAX_PAGES
        )))
    }

    /// Update an item's comment
    ///
    /// Cloudflare has no per-item update endpoint. POSTing an item whose
    /// content already exists rewrites its comment in place, so this reads the
    /// item first and posts its content back with the new comment.
    async fn update_item(
        &self,
        account_id: &str,
        list_id: &str,
        item_id: &str,
        patch: &ItemPatch,
    ) -> Result<ApplyOutcome<ListItem>> {
        if patch.payload.is_some() {
            return Err(Error::rejected(
                "Cloudflare list items cannot change content in place",
            ));
        }

        let current = self.get_item(account_id, list_id, item_id).await?;
        let Some(comment) = &patch.comment else {
            return Ok(ApplyOutcome::Applied(current));
        };

        tracing::info!("Updating comment of {} in Cloudflare list {}", item_id, list_id);
        let body = WireNewItem {
            // An empty comment clears it
            comment: Some(comment.clone().unwrap_or_default()),
            fields: current.payload.to_raw(),
        };
        let operation_id = self.post_items(account_id, list_id, &[body]).await?;
        Ok(ApplyOutcome::Pending { operation_id })
    }

    /// Remove one item
    ///
    /// # API Call
    ///
    /// ```http
    /// DELETE /accounts/:account_id/rules/lists/:list_id/items
    /// { "items": [{ "id": "..." }] }
    /// ```
    async fn delete_item(&self, account_id: &str, list_id: &str, item_id: &str) -> Result<ApplyOutcome<()>> {
        tracing::info!("Removing {} from Cloudflare list {}", item_id, list_id);
        let url = self.items_path(account_id, list_id);
        let body = WireDeleteItems {
            items: vec![WireItemRef {
                id: item_id.to_string(),
            }],
        };
        let operation: WireOperationRef = self
            .request::<WireOperationRef, _>(Method::DELETE, &url, &[], Some(&body))
            .await?
            .result
            .ok_or_else(|| Error::transport("Invalid response format: missing operation id"))?;
        Ok(ApplyOutcome::Pending {
            operation_id: operation.operation_id,
        })
    }

    async fn get_operation(&self, account_id: &str, operation_id: &str) -> Result<OperationStatus> {
        let url = format!(
            "{}/accounts/{}/rules/lists/bulk_operations/{}",
            self.base_url, account_id, operation_id
        );
        let operation: WireOperation = self.get(&url, &[]).await?;
        Ok(operation.into())
    }

    fn provider_name(&self) -> &'static str {
        "cloudflare"
    }
}

/// Factory for creating Cloudflare clients
pub struct CloudflareFactory;

impl ListApiFactory for CloudflareFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn ListApi>> {
        match config {
            ProviderConfig::Cloudflare { api_token, base_url } => {
                if api_token.is_empty() {
                    return Err(Error::config("Cloudflare API token is required"));
                }

                let api = match base_url {
                    Some(base_url) => {
                        tracing::warn!("Using non-default Cloudflare API base URL: {}", base_url);
                        CloudflareListApi::with_base_url(api_token.clone(), base_url.clone())?
                    }
                    None => CloudflareListApi::new(api_token.clone())?,
                };
                Ok(Box::new(api))
            }
            _ => Err(Error::config("Invalid config for Cloudflare provider")),
        }
    }
}

/// Register the Cloudflare client with a registry
///
/// # Example
///
/// ```rust
/// use listsync_core::ApiRegistry;
///
/// let registry = ApiRegistry::new();
/// listsync_provider_cloudflare::register(&registry);
/// assert!(registry.has_provider("cloudflare"));
/// ```
pub fn register(registry: &ApiRegistry) {
    registry.register_provider("cloudflare", Box::new(CloudflareFactory));
}
