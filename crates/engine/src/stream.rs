use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use wellsync_core::{
    CoreError, DayRecord, Projection, UserId,
    dates::local_now,
    series::{find_day, local_only, merge_daily, retain_window, upsert_day},
};

use crate::context::{
    PendingPushes, SyncContext, decode_rows, encode_rows, fetch_rows, push_rows, read_local,
    write_local,
};
use crate::error::EngineError;

/// Where a stream is in its load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Unloaded,
    Loading,
    /// Loaded from the device cache only (no identity, or the remote failed).
    LocalOnly,
    /// Merged with a successful remote fetch.
    Reconciled,
}

/// How a single load cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Reconciled,
    LocalOnly,
    /// The identity changed while the cycle was in flight; nothing was published.
    Discarded,
}

struct StreamState<P: Projection> {
    records: Vec<P::Record>,
    phase: LoadPhase,
    /// Bumped by every local write.
    revision: u64,
    /// Day -> revision of its latest local write.
    touched: BTreeMap<NaiveDate, u64>,
    /// Rows of writes made while a cycle was loading, held back until it settles.
    deferred: Vec<P::Row>,
}

/// Reconciler for one daily series.
pub(crate) struct DailyStream<P: Projection> {
    state: Mutex<StreamState<P>>,
    gate: tokio::sync::Mutex<()>,
    pending: PendingPushes,
}

impl<P: Projection> DailyStream<P> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StreamState {
                records: Vec::new(),
                phase: LoadPhase::Unloaded,
                revision: 0,
                touched: BTreeMap::new(),
                deferred: Vec::new(),
            }),
            gate: tokio::sync::Mutex::new(()),
            pending: PendingPushes::default(),
        }
    }

    fn hydrate(state: &mut StreamState<P>, ctx: &SyncContext) {
        if state.phase != LoadPhase::Unloaded {
            return;
        }
        let mut records: Vec<P::Record> =
            read_local(ctx.local.as_ref(), P::KIND, P::LOCAL_KEY).unwrap_or_default();
        records.retain(|record| match record.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    series = P::KIND.as_str(),
                    date = %record.date(),
                    error = %e,
                    "dropping invalid cached record"
                );
                false
            }
        });
        state.records = records;
        state.phase = LoadPhase::LocalOnly;
    }

    pub fn snapshot(&self, ctx: &SyncContext) -> Vec<P::Record> {
        let mut state = self.state.lock();
        Self::hydrate(&mut state, ctx);
        state.records.clone()
    }

    pub fn day(&self, ctx: &SyncContext, date: NaiveDate) -> Option<P::Record> {
        let mut state = self.state.lock();
        Self::hydrate(&mut state, ctx);
        find_day(&state.records, date).cloned()
    }

    pub fn phase(&self) -> LoadPhase {
        self.state.lock().phase
    }

    /// Replace the record for `date` with `update(current)`, persist the series
    /// and push the change in the background.
    pub fn update<F>(
        &self,
        ctx: &Arc<SyncContext>,
        date: NaiveDate,
        update: F,
    ) -> Result<P::Record, EngineError>
    where
        F: FnOnce(Option<&P::Record>) -> P::Record,
    {
        let user = ctx.identity.current_user();
        let (next, rows) = {
            let mut state = self.state.lock();
            Self::hydrate(&mut state, ctx);

            let previous = find_day(&state.records, date).cloned();
            let next = update(previous.as_ref());
            if next.date() != date {
                return Err(CoreError::InvalidValue(format!(
                    "{} record for {} written under {date}",
                    P::KIND,
                    next.date()
                ))
                .into());
            }
            next.validate()?;

            let before = state.records.clone();
            upsert_day(&mut state.records, next.clone());
            if let Err(e) = write_local(ctx.local.as_ref(), P::LOCAL_KEY, &state.records) {
                error!(
                    series = P::KIND.as_str(),
                    %date,
                    error = %e,
                    "local write failed, change rolled back"
                );
                state.records = before;
                return Err(e);
            }
            state.revision += 1;
            let revision = state.revision;
            state.touched.insert(date, revision);

            let rows = match &user {
                Some(user) => P::record_rows(user, previous.as_ref(), &next, local_now()),
                None => Vec::new(),
            };
            // A fetch in flight would miss these rows; the cycle pushes the
            // difference from what it fetched instead.
            if state.phase == LoadPhase::Loading {
                state.deferred.extend(rows);
                (next, Vec::new())
            } else {
                (next, rows)
            }
        };

        if !rows.is_empty() {
            self.spawn_push(ctx, rows);
        }
        Ok(next)
    }

    fn spawn_push(&self, ctx: &Arc<SyncContext>, rows: Vec<P::Row>) {
        let rows = match encode_rows(P::TABLE, &rows) {
            Ok(rows) => rows,
            Err(e) => {
                error!(series = P::KIND.as_str(), error = %e, "could not encode rows for push");
                return;
            }
        };
        let remote = Arc::clone(&ctx.remote);
        let handle = ctx.runtime.spawn(async move {
            // Failure is logged by push_rows; the next load cycle re-derives the day.
            let _ = push_rows(remote.as_ref(), P::KIND, P::TABLE, rows, P::CONFLICT_TARGET).await;
        });
        self.pending.track(handle);
    }

    pub async fn settle(&self) {
        self.pending.settle().await;
    }

    /// Run one load cycle: fetch, merge, persist, publish, push corrections and backfill.
    pub async fn load(&self, ctx: &Arc<SyncContext>) -> LoadOutcome {
        let _gate = self.gate.lock().await;

        let (prior_phase, start_revision) = {
            let mut state = self.state.lock();
            Self::hydrate(&mut state, ctx);
            let prior = state.phase;
            state.phase = LoadPhase::Loading;
            (prior, state.revision)
        };
        // Pushes started before this point must land before the fetch, or
        // their days would look local-only and be pushed twice.
        self.pending.settle().await;

        let user = ctx.identity.current_user();
        let remote = match &user {
            Some(user) => self.fetch(ctx, user).await,
            None => None,
        };

        if ctx.identity.current_user() != user {
            debug!(
                series = P::KIND.as_str(),
                "identity changed during load cycle, discarding result"
            );
            let deferred = {
                let mut state = self.state.lock();
                state.phase = prior_phase;
                std::mem::take(&mut state.deferred)
            };
            if !deferred.is_empty() {
                self.spawn_push(ctx, deferred);
            }
            return LoadOutcome::Discarded;
        }

        let window = ctx.config.retention_days;
        let (corrections, backfill, deferred) = {
            let mut state = self.state.lock();
            let keep_local: BTreeSet<NaiveDate> = state
                .touched
                .iter()
                .filter(|(_, revision)| **revision > start_revision)
                .map(|(date, _)| *date)
                .collect();

            let merged = merge_daily(&state.records, remote.as_deref(), &keep_local, window);
            let merged = retain_window(merged, window);

            let mut corrections = Vec::new();
            let mut backfill = Vec::new();
            let mut deferred = std::mem::take(&mut state.deferred);
            if let (Some(remote), Some(user)) = (&remote, &user) {
                // The fetched rows are the base the held-back writes apply to.
                deferred.clear();
                let now = local_now();
                for date in &keep_local {
                    if let Some(local) = find_day(&merged, *date) {
                        let base = find_day(remote, *date);
                        corrections.push((*date, P::record_rows(user, base, local, now)));
                    }
                }
                for record in local_only(&merged, remote) {
                    if !keep_local.contains(&record.date()) {
                        backfill.push((record.date(), P::backfill_rows(user, record)));
                    }
                }
            }

            if let Err(e) = write_local(ctx.local.as_ref(), P::LOCAL_KEY, &merged) {
                error!(series = P::KIND.as_str(), error = %e, "could not persist merged series");
            }
            state.records = merged;
            state.phase = if remote.is_some() {
                LoadPhase::Reconciled
            } else {
                LoadPhase::LocalOnly
            };
            state.touched.retain(|_, revision| *revision > start_revision);
            (corrections, backfill, deferred)
        };

        if !deferred.is_empty() {
            self.spawn_push(ctx, deferred);
        }
        self.push_days(ctx, "correction", &corrections).await;
        self.push_days(ctx, "backfill", &backfill).await;

        let outcome = if remote.is_some() {
            LoadOutcome::Reconciled
        } else {
            LoadOutcome::LocalOnly
        };
        info!(
            series = P::KIND.as_str(),
            ?outcome,
            corrected = corrections.len(),
            backfilled = backfill.len(),
            "load cycle finished"
        );
        outcome
    }

    async fn fetch(&self, ctx: &SyncContext, user: &UserId) -> Option<Vec<P::Record>> {
        let rows = fetch_rows(
            ctx.remote.as_ref(),
            P::KIND,
            P::TABLE,
            user,
            P::ORDER_COLUMN,
            true,
        )
        .await?;
        let rows: Vec<P::Row> = decode_rows(P::TABLE, rows);
        Some(P::from_remote_rows(rows))
    }

    /// Push rows day by day so one rejected day does not hold back the rest.
    async fn push_days(
        &self,
        ctx: &SyncContext,
        purpose: &str,
        days: &[(NaiveDate, Vec<P::Row>)],
    ) {
        for (date, rows) in days {
            if rows.is_empty() {
                continue;
            }
            match encode_rows(P::TABLE, rows) {
                Ok(rows) => {
                    let remote = ctx.remote.as_ref();
                    let _ = push_rows(remote, P::KIND, P::TABLE, rows, P::CONFLICT_TARGET).await;
                }
                Err(e) => {
                    error!(
                        series = P::KIND.as_str(),
                        %date,
                        purpose,
                        error = %e,
                        "could not encode rows"
                    );
                }
            }
        }
    }
}
