//! Deadlines and cancellation for remote calls
//!
//! Every remote call made by the reconciler goes through [`CallContext::call`],
//! which bounds it by the configured deadline and aborts it when the pass is
//! cancelled. An abandoned call is never retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::EngineConfig;
use crate::error::{Error, Result};

/// Handle used to cancel in-flight reconciliation
///
/// Cloning the handle is cheap; cancelling through any clone cancels every
/// call made by the reconciler it came from.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Abort in-flight and future remote calls
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CallContext {
    call_timeout: Duration,
    poll_interval: Duration,
    max_polls: usize,
    cancel_rx: watch::Receiver<bool>,
    cancel: CancelHandle,
}

impl CallContext {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        let (tx, cancel_rx) = watch::channel(false);
        Self {
            call_timeout: config.call_timeout(),
            poll_interval: config.operation_poll_interval(),
            max_polls: config.operation_max_polls,
            cancel_rx,
            cancel: CancelHandle { tx: Arc::new(tx) },
        }
    }

    pub(crate) fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub(crate) fn max_polls(&self) -> usize {
        self.max_polls
    }

    /// Total time spent waiting on one operation before giving up
    pub(crate) fn poll_budget(&self) -> Duration {
        let polls = u32::try_from(self.max_polls).unwrap_or(u32::MAX);
        self.poll_interval.saturating_mul(polls)
    }

    /// Run one remote call under the deadline
    pub(crate) async fn call<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled(what.to_string()));
        }

        tokio::select! {
            biased;
            _ = self.cancelled() => {
                tracing::debug!("Abandoning {}: cancelled", what);
                Err(Error::Cancelled(what.to_string()))
            }
            result = tokio::time::timeout(self.call_timeout, fut) => match result {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("Abandoning {}: no response within {:?}", what, self.call_timeout);
                    Err(Error::Timeout(self.call_timeout))
                }
            },
        }
    }

    /// Wait between operation polls, waking early on cancellation
    pub(crate) async fn pause(&self, what: &str) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Error::Cancelled(what.to_string())),
            _ = tokio::time::sleep(self.poll_interval) => Ok(()),
        }
    }

    async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        // The sender lives as long as any context clone, so this only ends on cancel
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
