//! Whole-pass reconciliation
//!
//! Items are independent, so a pass reconciles them concurrently, bounded by
//! `max_concurrency`. One item failing never stops the others.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use super::{Action, Applied, ReconcileEvent, Reconciler};
use crate::error::{Error, Result};
use crate::model::DesiredItem;
use crate::traits::{ItemState, StateStore};

/// Summary of a reconciliation pass
#[derive(Debug, Default)]
pub struct PassReport {
    /// Items that reached their declared state, sorted by name
    pub applied: Vec<(String, Applied)>,
    /// Items that failed, sorted by name
    pub failed: Vec<(String, Error)>,
}

impl PassReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of items whose remote record was changed
    pub fn changed(&self) -> usize {
        self.applied.iter().filter(|(_, applied)| applied.is_change()).count()
    }
}

/// Summary of a dry run
#[derive(Debug, Default)]
pub struct PlanReport {
    /// Declared items and what reconciling them would do
    pub actions: Vec<(String, Action)>,
    /// Tracked items that are no longer declared and would be deleted
    pub removals: Vec<String>,
    /// Items that could not be planned
    pub failed: Vec<(String, Error)>,
}

impl PlanReport {
    /// Whether applying would change anything
    pub fn has_changes(&self) -> bool {
        !self.removals.is_empty() || self.actions.iter().any(|(_, action)| !action.is_noop())
    }
}

enum Job {
    Apply(DesiredItem),
    Remove(String),
}

impl Job {
    fn name(&self) -> &str {
        match self {
            Job::Apply(desired) => &desired.name,
            Job::Remove(name) => name,
        }
    }
}

impl Reconciler {
    /// Reconcile every declared item
    ///
    /// With `prune`, tracked items that are no longer declared are deleted.
    /// A tracked item whose record is now declared under another name is
    /// re-keyed instead of deleted. Removals finish before any declared item
    /// is applied, so a deletion never races an adoption of the same record.
    /// Tracked state is updated per item as soon as that item succeeds.
    ///
    /// # Returns
    ///
    /// - `Ok(PassReport)`: per-item results, including failures
    /// - `Err(Error)`: the state store could not be read or flushed
    pub async fn reconcile_all(
        &self,
        items: Vec<DesiredItem>,
        store: Arc<dyn StateStore>,
        prune: bool,
    ) -> Result<PassReport> {
        let mut removals = Vec::new();
        if prune {
            let (renames, undeclared) = split_undeclared(&items, store.as_ref()).await?;
            for rename in renames {
                info!(
                    "{} is now declared as {}, keeping its remote record",
                    rename.from, rename.to
                );
                store.set(&rename.to, &rename.state).await?;
                store.delete(&rename.from).await?;
            }
            removals.extend(undeclared.into_iter().map(Job::Remove));
        }
        let applies = items.into_iter().map(Job::Apply).collect();

        self.run_jobs(vec![removals, applies], store).await
    }

    /// Delete every tracked item
    pub async fn destroy_all(&self, store: Arc<dyn StateStore>) -> Result<PassReport> {
        let mut names = store.list().await?;
        names.sort();
        self.run_jobs(vec![names.into_iter().map(Job::Remove).collect()], store)
            .await
    }

    /// Plan every declared item without changing anything remotely
    pub async fn plan_all(
        &self,
        items: &[DesiredItem],
        store: &dyn StateStore,
        prune: bool,
    ) -> Result<PlanReport> {
        let mut report = PlanReport::default();

        let renames = if prune {
            let (renames, undeclared) = split_undeclared(items, store).await?;
            report.removals = undeclared;
            renames
        } else {
            Vec::new()
        };

        for desired in items {
            let current = match renames.iter().find(|rename| rename.to == desired.name) {
                Some(rename) => Some(rename.state.clone()),
                None => store.get(&desired.name).await?,
            };
            match self.plan(desired, current.as_ref()).await {
                Ok(action) => report.actions.push((desired.name.clone(), action)),
                Err(e) => report.failed.push((desired.name.clone(), e)),
            }
        }

        Ok(report)
    }

    /// Run job batches in order; jobs within a batch run concurrently
    async fn run_jobs(
        &self,
        batches: Vec<Vec<Job>>,
        store: Arc<dyn StateStore>,
    ) -> Result<PassReport> {
        let total: usize = batches.iter().map(Vec::len).sum();
        self.emit_event(ReconcileEvent::PassStarted { items: total });
        info!("Reconciling {} items with {}", total, self.provider_name());

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut report = PassReport::default();

        for batch in batches {
            let mut tasks = JoinSet::new();

            for job in batch {
                let reconciler = self.clone();
                let store = Arc::clone(&store);
                let semaphore = Arc::clone(&semaphore);

                tasks.spawn(async move {
                    let name = job.name().to_string();
                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => reconciler.run_job(job, store.as_ref()).await,
                        Err(_) => Err(Error::Cancelled("worker pool closed".to_string())),
                    };
                    (name, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, Ok(applied))) => report.applied.push((name, applied)),
                    Ok((name, Err(e))) => {
                        error!("Failed to reconcile {}: {}", name, e);
                        report.failed.push((name, e));
                    }
                    Err(e) => {
                        error!("Reconcile task aborted: {}", e);
                        report
                            .failed
                            .push(("<unknown>".to_string(), Error::Other(e.to_string())));
                    }
                }
            }
        }

        store.flush().await?;

        report.applied.sort_by(|a, b| a.0.cmp(&b.0));
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));

        self.emit_event(ReconcileEvent::PassFinished {
            succeeded: report.applied.len(),
            failed: report.failed.len(),
        });
        info!(
            "Pass finished: {} ok ({} changed), {} failed",
            report.applied.len(),
            report.changed(),
            report.failed.len()
        );

        Ok(report)
    }

    async fn run_job(&self, job: Job, store: &dyn StateStore) -> Result<Applied> {
        match job {
            Job::Apply(desired) => {
                let current = store.get(&desired.name).await?;
                let outcome = self.reconcile(&desired, current).await?;
                match &outcome.state {
                    Some(state) => store.set(&desired.name, state).await?,
                    None => store.delete(&desired.name).await?,
                }
                Ok(outcome.applied)
            }
            Job::Remove(name) => {
                let Some(state) = store.get(&name).await? else {
                    return Ok(Applied::AlreadyAbsent);
                };
                let outcome = self.delete(&name, &state).await?;
                store.delete(&name).await?;
                Ok(outcome.applied)
            }
        }
    }
}

/// Tracked state whose record is now declared under another name
struct Rename {
    from: String,
    to: String,
    state: ItemState,
}

/// Split tracked-but-undeclared names into renames and removals
///
/// A tracked record is a rename when an untracked declared item in the same
/// list has the same content. Each declared item takes at most one record.
async fn split_undeclared(
    items: &[DesiredItem],
    store: &dyn StateStore,
) -> Result<(Vec<Rename>, Vec<String>)> {
    let declared: HashSet<&str> = items.iter().map(|item| item.name.as_str()).collect();
    let mut undeclared: Vec<String> = store
        .list()
        .await?
        .into_iter()
        .filter(|name| !declared.contains(name.as_str()))
        .collect();
    undeclared.sort();

    let mut untracked = Vec::new();
    for desired in items {
        if store.get(&desired.name).await?.is_none() {
            untracked.push(desired);
        }
    }

    let mut renames = Vec::new();
    let mut removals = Vec::new();
    for name in undeclared {
        let Some(state) = store.get(&name).await? else {
            continue;
        };
        let owner = untracked.iter().position(|desired| {
            state.same_list(desired) && state.payload.matches(&desired.payload)
        });
        match owner {
            Some(index) => {
                let desired = untracked.swap_remove(index);
                renames.push(Rename {
                    from: name,
                    to: desired.name.clone(),
                    state,
                });
            }
            None => removals.push(name),
        }
    }

    Ok((renames, removals))
}
