//! Existence and identity resolution
//!
//! Decides whether a remote record exists, either by its server-assigned
//! identifier or, when no identifier is known, by content. A missing record
//! ([`Error::NotFound`]) is kept distinct from a failure to find out
//! ([`Error::Transport`] and friends) so callers only forget an item when the
//! remote service says it is gone.

use crate::error::{Error, Result};
use crate::model::{ItemPayload, ItemTarget, ListItem};
use crate::reconciler::context::CallContext;
use crate::traits::ListApi;

/// Existence check for a tracked identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Existence {
    /// The record exists with these attributes
    Present(ListItem),
    /// The remote service reported the record absent
    Gone,
}

pub(crate) struct Resolver<'a> {
    api: &'a dyn ListApi,
    ctx: &'a CallContext,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(api: &'a dyn ListApi, ctx: &'a CallContext) -> Self {
        Self { api, ctx }
    }

    /// Fetch by identifier, keeping the error annotated with the target
    pub(crate) async fn fetch(&self, target: &ItemTarget<'_>) -> Result<ListItem> {
        let item_id = target
            .item_id
            .ok_or_else(|| Error::Other(format!("{}: no item identifier to fetch", target)))?;

        self.ctx
            .call(
                "get item",
                self.api.get_item(target.account_id, target.list_id, item_id),
            )
            .await
            .map_err(|e| Error::remote(target.to_string(), e))
    }

    /// Like [`Resolver::fetch`], with absence folded into [`Existence::Gone`]
    pub(crate) async fn exists(&self, target: &ItemTarget<'_>) -> Result<Existence> {
        match self.fetch(target).await {
            Ok(item) => Ok(Existence::Present(item)),
            Err(e) if e.is_not_found() => {
                tracing::debug!("{} no longer exists remotely", target);
                Ok(Existence::Gone)
            }
            Err(e) => Err(e),
        }
    }

    /// Find an existing record with the same content
    ///
    /// The remote search is a substring match, so candidates are filtered with
    /// [`ItemPayload::matches`]. When duplicates exist the oldest one wins.
    pub(crate) async fn find_by_content(
        &self,
        account_id: &str,
        list_id: &str,
        payload: &ItemPayload,
    ) -> Result<Option<ListItem>> {
        let search = payload.search_key();
        let candidates = self
            .ctx
            .call(
                "list items",
                self.api.list_items(account_id, list_id, Some(&search)),
            )
            .await
            .map_err(|e| {
                let target = ItemTarget {
                    account_id,
                    list_id,
                    item_id: None,
                };
                Error::remote(target.to_string(), e)
            })?;

        let mut matching: Vec<ListItem> = candidates
            .into_iter()
            .filter(|item| item.payload.matches(payload))
            .collect();

        if matching.len() > 1 {
            tracing::warn!(
                "{} records in list {} match {}; using the oldest",
                matching.len(),
                list_id,
                payload
            );
        }

        // Unknown creation times sort last
        matching.sort_by_key(|item| (item.created_on.is_none(), item.created_on));
        Ok(matching.into_iter().next())
    }
}
