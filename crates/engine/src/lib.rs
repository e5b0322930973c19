mod context;
pub mod error;
mod habits;
pub mod identity;
mod stream;

pub use error::EngineError;
pub use identity::{IdentityProvider, SessionIdentity};
pub use stream::{LoadOutcome, LoadPhase};

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use chrono::NaiveDate;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use wellsync_core::{
    HabitId, SeriesKind, SyncConfig,
    breathing::{BreathingProjection, BreathingRecord},
    habits::{CompletionProjection, Habit, HabitCompletionLog, HabitProgress, progress},
    hydration::{HydrationProjection, HydrationRecord},
    sleep::{SleepProjection, SleepRecord},
};
use wellsync_storage::{LocalStore, RemoteStore};

use crate::context::SyncContext;
use crate::habits::HabitStream;
use crate::stream::DailyStream;

/// Per-series result of one [`SyncEngine::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub hydration: LoadOutcome,
    pub sleep: LoadOutcome,
    pub breathing: LoadOutcome,
    pub habit_completions: LoadOutcome,
    pub habits: LoadOutcome,
}

impl RefreshReport {
    pub fn outcome(&self, kind: SeriesKind) -> LoadOutcome {
        match kind {
            SeriesKind::Hydration => self.hydration,
            SeriesKind::Sleep => self.sleep,
            SeriesKind::Breathing => self.breathing,
            SeriesKind::HabitCompletions => self.habit_completions,
            SeriesKind::Habits => self.habits,
        }
    }

    pub fn all_reconciled(&self) -> bool {
        SeriesKind::ALL
            .iter()
            .all(|kind| self.outcome(*kind) == LoadOutcome::Reconciled)
    }
}

struct Inner {
    ctx: Arc<SyncContext>,
    hydration: DailyStream<HydrationProjection>,
    sleep: DailyStream<SleepProjection>,
    breathing: DailyStream<BreathingProjection>,
    completions: DailyStream<CompletionProjection>,
    habits: Arc<HabitStream>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Wellness metric store for one app session.
///
/// Reads are synchronous and served from memory. Writes persist to the local
/// store before returning and reach the remote store in the background.
/// Cloning is cheap; every clone shares the same session.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    /// Build an engine without touching either store. Must be called from
    /// inside a tokio runtime.
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
        config: SyncConfig,
    ) -> Result<Self, EngineError> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let ctx = Arc::new(SyncContext {
            local,
            remote,
            identity,
            config,
            runtime,
        });
        Ok(Self {
            inner: Arc::new(Inner {
                ctx,
                hydration: DailyStream::new(),
                sleep: DailyStream::new(),
                breathing: DailyStream::new(),
                completions: DailyStream::new(),
                habits: Arc::new(HabitStream::new()),
                listener: Mutex::new(None),
            }),
        })
    }

    /// Start a session: run the first load cycle and follow identity changes.
    pub async fn open(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
        config: SyncConfig,
    ) -> Result<Self, EngineError> {
        let engine = Self::new(local, remote, identity, config)?;
        engine.refresh().await;
        engine.watch_identity();
        Ok(engine)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.ctx.config
    }

    pub fn phase(&self, kind: SeriesKind) -> LoadPhase {
        let inner = &self.inner;
        match kind {
            SeriesKind::Hydration => inner.hydration.phase(),
            SeriesKind::Sleep => inner.sleep.phase(),
            SeriesKind::Breathing => inner.breathing.phase(),
            SeriesKind::HabitCompletions => inner.completions.phase(),
            SeriesKind::Habits => inner.habits.phase(),
        }
    }

    // ========================================================================
    // Series snapshots
    // ========================================================================

    pub fn hydration(&self) -> Vec<HydrationRecord> {
        self.inner.hydration.snapshot(&self.inner.ctx)
    }

    pub fn sleep(&self) -> Vec<SleepRecord> {
        self.inner.sleep.snapshot(&self.inner.ctx)
    }

    pub fn breathing(&self) -> Vec<BreathingRecord> {
        self.inner.breathing.snapshot(&self.inner.ctx)
    }

    pub fn habit_completions(&self) -> Vec<HabitCompletionLog> {
        self.inner.completions.snapshot(&self.inner.ctx)
    }

    pub fn habits(&self) -> Vec<Habit> {
        self.inner.habits.snapshot(&self.inner.ctx)
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Set the day's water intake. Values above the configured maximum are capped.
    pub fn record_hydration(
        &self,
        date: NaiveDate,
        milliliters: u32,
    ) -> Result<HydrationRecord, EngineError> {
        let ml = milliliters.min(self.config().max_daily_ml);
        self.inner
            .hydration
            .update(&self.inner.ctx, date, |_| HydrationRecord::new(date, ml))
    }

    pub fn add_water(
        &self,
        date: NaiveDate,
        milliliters: u32,
    ) -> Result<HydrationRecord, EngineError> {
        let max = self.config().max_daily_ml;
        self.inner.hydration.update(&self.inner.ctx, date, |current| {
            let total = current.map_or(0, |r| r.milliliters).saturating_add(milliliters);
            HydrationRecord::new(date, total.min(max))
        })
    }

    pub fn remove_water(
        &self,
        date: NaiveDate,
        milliliters: u32,
    ) -> Result<HydrationRecord, EngineError> {
        let max = self.config().max_daily_ml;
        self.inner.hydration.update(&self.inner.ctx, date, |current| {
            let total = current.map_or(0, |r| r.milliliters).saturating_sub(milliliters);
            HydrationRecord::new(date, total.min(max))
        })
    }

    pub fn record_sleep(
        &self,
        date: NaiveDate,
        hours: f64,
        quality_rating: u8,
    ) -> Result<SleepRecord, EngineError> {
        let record = SleepRecord::new(date, hours, quality_rating)?;
        self.inner.sleep.update(&self.inner.ctx, date, |_| record)
    }

    /// Set the day's absolute breathing-session count.
    pub fn record_breathing(
        &self,
        date: NaiveDate,
        session_count: u32,
    ) -> Result<BreathingRecord, EngineError> {
        self.inner
            .breathing
            .update(&self.inner.ctx, date, |_| BreathingRecord::new(date, session_count))
    }

    pub fn complete_breathing_session(
        &self,
        date: NaiveDate,
    ) -> Result<BreathingRecord, EngineError> {
        self.inner.breathing.update(&self.inner.ctx, date, |current| {
            let count = current.map_or(0, |r| r.session_count).saturating_add(1);
            BreathingRecord::new(date, count)
        })
    }

    /// Replace the day's set of completed habits.
    pub fn record_completions(
        &self,
        date: NaiveDate,
        completed: BTreeSet<HabitId>,
    ) -> Result<HabitCompletionLog, EngineError> {
        self.inner.completions.update(&self.inner.ctx, date, |_| HabitCompletionLog {
            date,
            completed_habit_ids: completed,
        })
    }

    pub fn set_habit_completed(
        &self,
        date: NaiveDate,
        habit_id: HabitId,
        completed: bool,
    ) -> Result<HabitCompletionLog, EngineError> {
        self.inner.completions.update(&self.inner.ctx, date, |current| {
            current
                .cloned()
                .unwrap_or_else(|| HabitCompletionLog::new(date))
                .with_completed(habit_id, completed)
        })
    }

    pub fn toggle_habit(
        &self,
        date: NaiveDate,
        habit_id: HabitId,
    ) -> Result<HabitCompletionLog, EngineError> {
        self.inner.completions.update(&self.inner.ctx, date, |current| {
            let log = current.cloned().unwrap_or_else(|| HabitCompletionLog::new(date));
            let done = log.is_completed(habit_id);
            log.with_completed(habit_id, !done)
        })
    }

    pub fn habit_progress(&self, date: NaiveDate) -> HabitProgress {
        let habits = self.habits();
        let log = self.inner.completions.day(&self.inner.ctx, date);
        progress(&habits, log.as_ref())
    }

    // ========================================================================
    // Habit definitions
    // ========================================================================

    pub fn add_habit(
        &self,
        title: &str,
        icon: &str,
        color_token: &str,
    ) -> Result<Habit, EngineError> {
        self.inner.habits.add(&self.inner.ctx, title, icon, color_token)
    }

    /// Remove a habit definition. Its completion history is kept.
    pub fn delete_habit(&self, id: HabitId) -> Result<Habit, EngineError> {
        self.inner.habits.delete(&self.inner.ctx, id)
    }

    // ========================================================================
    // Load cycles and session lifecycle
    // ========================================================================

    /// Run a load cycle for every series. Series reconcile independently and
    /// a failure in one never affects the others.
    pub async fn refresh(&self) -> RefreshReport {
        let inner = &self.inner;
        let ctx = &inner.ctx;
        let (hydration, sleep, breathing, habit_completions, habits) = tokio::join!(
            inner.hydration.load(ctx),
            inner.sleep.load(ctx),
            inner.breathing.load(ctx),
            inner.completions.load(ctx),
            inner.habits.load(ctx),
        );
        RefreshReport {
            hydration,
            sleep,
            breathing,
            habit_completions,
            habits,
        }
    }

    /// Wait until every background push started so far has finished.
    pub async fn settle(&self) {
        let inner = &self.inner;
        tokio::join!(
            inner.hydration.settle(),
            inner.sleep.settle(),
            inner.breathing.settle(),
            inner.completions.settle(),
            inner.habits.settle(),
        );
    }

    /// Run a load cycle whenever the signed-in user changes. Replaces any
    /// listener started earlier.
    pub fn watch_identity(&self) {
        let mut rx = self.inner.ctx.identity.subscribe();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = self.inner.ctx.runtime.spawn(async move {
            while rx.changed().await.is_ok() {
                let signed_in = rx.borrow_and_update().is_some();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                info!(signed_in, "identity changed, starting load cycle");
                SyncEngine { inner }.refresh().await;
            }
            debug!("identity listener stopped");
        });
        if let Some(previous) = self.inner.listener.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Tear the session down: stop following identity changes and let
    /// in-flight pushes finish.
    pub async fn shutdown(self) {
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
        self.settle().await;
    }
}
