use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use wellsync_core::{
    HabitId, RemoteTable, SeriesKind, UserId,
    dates::local_now,
    habits::{
        HABITS_KEY, HABITS_PENDING_KEY, Habit, HabitRow, PendingSync, merge_habits, seed_habits,
        stale_remote_ids,
    },
};

use crate::context::{
    PendingPushes, SyncContext, decode_rows, encode_rows, fetch_rows, push_rows, read_local,
    write_local,
};
use crate::error::EngineError;
use crate::stream::{LoadOutcome, LoadPhase};

const ORDER_COLUMN: &str = "created_at";
const CONFLICT_TARGET: &[&str] = &["id"];

struct HabitState {
    habits: Vec<Habit>,
    phase: LoadPhase,
    revision: u64,
    pending: Option<PendingSync>,
    /// Whether a habit list has ever been written to the device cache.
    stored: bool,
}

/// Reconciler for habit definitions.
///
/// Definitions are pushed as a whole: every local habit is upserted and any
/// remote habit missing locally is deleted. While local changes are pending
/// for the signed-in user the local list is authoritative; otherwise remote
/// definitions are merged in additively.
pub(crate) struct HabitStream {
    state: Mutex<HabitState>,
    gate: tokio::sync::Mutex<()>,
    push_lock: tokio::sync::Mutex<()>,
    pending_pushes: PendingPushes,
}

impl HabitStream {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HabitState {
                habits: Vec::new(),
                phase: LoadPhase::Unloaded,
                revision: 0,
                pending: None,
                stored: false,
            }),
            gate: tokio::sync::Mutex::new(()),
            push_lock: tokio::sync::Mutex::new(()),
            pending_pushes: PendingPushes::default(),
        }
    }

    fn hydrate(state: &mut HabitState, ctx: &SyncContext) {
        if state.phase != LoadPhase::Unloaded {
            return;
        }
        match read_local::<Habit>(ctx.local.as_ref(), SeriesKind::Habits, HABITS_KEY) {
            Some(habits) => {
                state.habits = habits;
                state.stored = true;
            }
            None => state.stored = false,
        }
        state.pending = match ctx.local.get(HABITS_PENDING_KEY) {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(error = %e, "unreadable pending-sync marker, ignoring it");
                None
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "could not read pending-sync marker");
                None
            }
        };
        state.phase = LoadPhase::LocalOnly;
    }

    fn persist(state: &mut HabitState, ctx: &SyncContext) -> Result<(), EngineError> {
        write_local(ctx.local.as_ref(), HABITS_KEY, &state.habits)?;
        write_local(ctx.local.as_ref(), HABITS_PENDING_KEY, &state.pending)?;
        state.stored = true;
        Ok(())
    }

    pub fn snapshot(&self, ctx: &SyncContext) -> Vec<Habit> {
        let mut state = self.state.lock();
        Self::hydrate(&mut state, ctx);
        state.habits.clone()
    }

    pub fn phase(&self) -> LoadPhase {
        self.state.lock().phase
    }

    pub fn add(
        self: &Arc<Self>,
        ctx: &Arc<SyncContext>,
        title: &str,
        icon: &str,
        color_token: &str,
    ) -> Result<Habit, EngineError> {
        let habit = Habit::new(title, icon, color_token, local_now());
        let added = habit.clone();
        self.mutate(ctx, move |habits| {
            habits.push(habit);
            Ok(())
        })?;
        Ok(added)
    }

    pub fn delete(
        self: &Arc<Self>,
        ctx: &Arc<SyncContext>,
        id: HabitId,
    ) -> Result<Habit, EngineError> {
        self.mutate(ctx, |habits| {
            let index = habits
                .iter()
                .position(|h| h.id == id)
                .ok_or_else(|| EngineError::HabitNotFound(id.to_string()))?;
            Ok(habits.remove(index))
        })
    }

    fn mutate<T, F>(self: &Arc<Self>, ctx: &Arc<SyncContext>, change: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Vec<Habit>) -> Result<T, EngineError>,
    {
        let user = ctx.identity.current_user();
        let result = {
            let mut state = self.state.lock();
            Self::hydrate(&mut state, ctx);

            let habits_before = state.habits.clone();
            let pending_before = state.pending.clone();
            let result = change(&mut state.habits)?;
            state.pending = Some(PendingSync { user: user.clone() });
            if let Err(e) = Self::persist(&mut state, ctx) {
                error!(error = %e, "local write of habits failed, change rolled back");
                state.habits = habits_before;
                state.pending = pending_before;
                return Err(e);
            }
            state.revision += 1;
            result
        };

        if let Some(user) = user {
            self.spawn_push(ctx, user);
        }
        Ok(result)
    }

    fn spawn_push(self: &Arc<Self>, ctx: &Arc<SyncContext>, user: UserId) {
        let stream = Arc::clone(self);
        let task_ctx = Arc::clone(ctx);
        let handle = ctx.runtime.spawn(async move {
            if let Err(e) = stream.push_definitions(&task_ctx, &user).await {
                warn!(error = %e, "habit push failed, will retry on next load cycle");
            }
        });
        self.pending_pushes.track(handle);
    }

    pub async fn settle(&self) {
        self.pending_pushes.settle().await;
    }

    /// Upsert every local definition, then delete remote ones missing locally.
    async fn push_definitions(&self, ctx: &SyncContext, user: &UserId) -> Result<(), EngineError> {
        let _push = self.push_lock.lock().await;
        let (habits, revision) = {
            let state = self.state.lock();
            (state.habits.clone(), state.revision)
        };

        if !habits.is_empty() {
            let rows: Vec<HabitRow> = habits.iter().map(|h| h.to_row(user)).collect();
            let rows = encode_rows(RemoteTable::Habits, &rows)?;
            let remote = ctx.remote.as_ref();
            push_rows(remote, SeriesKind::Habits, RemoteTable::Habits, rows, CONFLICT_TARGET)
                .await?;
        }

        let remote_rows = ctx
            .remote
            .select(RemoteTable::Habits, user, ORDER_COLUMN, false)
            .await?;
        let remote_ids: Vec<HabitId> = remote_rows
            .iter()
            .filter_map(|row| row.get("id")?.as_str())
            .filter_map(|id| HabitId::parse(id).ok())
            .collect();
        let stale = stale_remote_ids(&habits, &remote_ids);
        if !stale.is_empty() {
            let ids: Vec<String> = stale.iter().map(|id| id.to_string()).collect();
            ctx.remote.delete(RemoteTable::Habits, "id", &ids).await?;
            info!(deleted = ids.len(), "deleted remote habits missing locally");
        }

        let mut state = self.state.lock();
        if state.revision == revision {
            state.pending = None;
            if let Err(e) = write_local(ctx.local.as_ref(), HABITS_PENDING_KEY, &state.pending) {
                error!(error = %e, "could not clear pending-sync marker");
            }
        }
        Ok(())
    }

    pub async fn load(self: &Arc<Self>, ctx: &Arc<SyncContext>) -> LoadOutcome {
        let _gate = self.gate.lock().await;

        let (prior_phase, start_revision) = {
            let mut state = self.state.lock();
            Self::hydrate(&mut state, ctx);
            let prior = state.phase;
            state.phase = LoadPhase::Loading;
            (prior, state.revision)
        };
        self.pending_pushes.settle().await;

        let Some(user) = ctx.identity.current_user() else {
            let mut state = self.state.lock();
            if !state.stored && state.habits.is_empty() {
                state.habits = seed_habits(&ctx.config.default_habits, local_now());
                if let Err(e) = Self::persist(&mut state, ctx) {
                    error!(error = %e, "could not persist starter habits");
                }
            }
            state.phase = LoadPhase::LocalOnly;
            return LoadOutcome::LocalOnly;
        };

        let owned = self
            .state
            .lock()
            .pending
            .as_ref()
            .is_some_and(|p| p.is_owned_by(&user));
        if owned {
            return self.push_pending(ctx, &user, prior_phase).await;
        }

        let remote = fetch_rows(
            ctx.remote.as_ref(),
            SeriesKind::Habits,
            RemoteTable::Habits,
            &user,
            ORDER_COLUMN,
            false,
        )
        .await
        .map(|rows| {
            decode_rows::<HabitRow>(RemoteTable::Habits, rows)
                .into_iter()
                .map(HabitRow::into_habit)
                .collect::<Vec<_>>()
        });

        if ctx.identity.current_user().as_ref() != Some(&user) {
            debug!("identity changed during habit load, discarding result");
            self.state.lock().phase = prior_phase;
            return LoadOutcome::Discarded;
        }

        let needs_push = {
            let mut state = self.state.lock();
            if state.revision != start_revision {
                // Changed locally while fetching: the local list and its
                // pending marker stand, and are pushed as a whole below.
                None
            } else {
                let mut merged = merge_habits(&state.habits, remote.as_deref());
                let mut needs_push = false;
                if let Some(remote) = &remote {
                    if merged.len() > remote.len() {
                        needs_push = true;
                    }
                    if merged.is_empty() && !state.stored {
                        merged = seed_habits(&ctx.config.default_habits, local_now());
                        needs_push = true;
                    }
                    state.pending = needs_push.then(|| PendingSync {
                        user: Some(user.clone()),
                    });
                }
                let changed = merged != state.habits;
                if changed || needs_push {
                    state.revision += 1;
                }
                state.habits = merged;
                // After a failed fetch the list stays unstored so starters can still be seeded.
                if remote.is_some() || changed {
                    if let Err(e) = Self::persist(&mut state, ctx) {
                        error!(error = %e, "could not persist merged habits");
                    }
                }
                state.phase = if remote.is_some() {
                    LoadPhase::Reconciled
                } else {
                    LoadPhase::LocalOnly
                };
                Some(needs_push)
            }
        };

        let Some(needs_push) = needs_push else {
            debug!("habits changed during load, pushing local list instead of merging");
            return self.push_pending(ctx, &user, prior_phase).await;
        };

        if needs_push {
            if let Err(e) = self.push_definitions(ctx, &user).await {
                warn!(error = %e, "habit push after merge failed");
            }
        }

        let outcome = if remote.is_some() {
            LoadOutcome::Reconciled
        } else {
            LoadOutcome::LocalOnly
        };
        info!(series = "habits", ?outcome, "load cycle finished");
        outcome
    }

    /// Push the local list as authoritative and end the cycle on its result.
    async fn push_pending(
        &self,
        ctx: &SyncContext,
        user: &UserId,
        prior_phase: LoadPhase,
    ) -> LoadOutcome {
        let result = self.push_definitions(ctx, user).await;
        if ctx.identity.current_user().as_ref() != Some(user) {
            self.state.lock().phase = prior_phase;
            return LoadOutcome::Discarded;
        }
        let outcome = match result {
            Ok(()) => LoadOutcome::Reconciled,
            Err(e) => {
                warn!(error = %e, "pending habit changes not pushed, keeping local list");
                LoadOutcome::LocalOnly
            }
        };
        self.state.lock().phase = phase_for(outcome);
        info!(series = "habits", ?outcome, "load cycle finished");
        outcome
    }
}

fn phase_for(outcome: LoadOutcome) -> LoadPhase {
    match outcome {
        LoadOutcome::Reconciled => LoadPhase::Reconciled,
        LoadOutcome::LocalOnly | LoadOutcome::Discarded => LoadPhase::LocalOnly,
    }
}
