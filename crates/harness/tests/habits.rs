use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use wellsync_core::{
    HabitId, RemoteTable, UserId,
    habits::{CompletionRow, Habit, HabitProgress, HabitRow},
};
use wellsync_engine::{EngineError, LoadOutcome};
use wellsync_harness::{MemoryRemote, TestDevice};

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn ids(habits: &[Habit]) -> BTreeSet<HabitId> {
    habits.iter().map(|h| h.id).collect()
}

fn remote_ids(remote: &MemoryRemote) -> Result<BTreeSet<HabitId>, serde_json::Error> {
    let rows: Vec<HabitRow> = remote.rows_as(RemoteTable::Habits)?;
    Ok(rows.iter().map(|r| r.id).collect())
}

// ============================================================================
// Seeding
// ============================================================================

#[tokio::test]
async fn first_load_seeds_starters_for_new_account() -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(MemoryRemote::new());
    let device = TestDevice::signed_in(&remote, "u1")?;

    let report = device.engine.refresh().await;
    assert_eq!(report.habits, LoadOutcome::Reconciled);

    let habits = device.engine.habits();
    let titles: Vec<&str> = habits.iter().map(|h| h.title.as_str()).collect();
    assert_eq!(titles, vec!["Drink water", "Morning stretch", "Read 10 pages", "Meditate"]);
    assert_eq!(remote_ids(&remote)?, ids(&habits));

    // A second device of the same account adopts the seeded list as is.
    let other = TestDevice::signed_in(&remote, "u1")?;
    other.engine.refresh().await;
    assert_eq!(ids(&other.engine.habits()), ids(&habits));
    assert_eq!(remote.rows(RemoteTable::Habits).len(), 4);
    Ok(())
}

#[tokio::test]
async fn anonymous_first_load_seeds_locally_only() -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(MemoryRemote::new());
    let device = TestDevice::new(&remote)?;

    device.engine.refresh().await;
    assert_eq!(device.engine.habits().len(), 4);
    assert!(remote.rows(RemoteTable::Habits).is_empty());

    // Seeding happens once; an emptied list stays empty.
    for habit in device.engine.habits() {
        device.engine.delete_habit(habit.id)?;
    }
    device.engine.refresh().await;
    assert!(device.engine.habits().is_empty());
    Ok(())
}

#[tokio::test]
async fn existing_account_habits_are_not_seeded_over() -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(MemoryRemote::new());
    let habit = Habit::new("Journal", "pen", "rose", wellsync_core::dates::local_now());
    remote.insert(RemoteTable::Habits, &[habit.to_row(&UserId::new("u1"))])?;

    let device = TestDevice::signed_in(&remote, "u1")?;
    device.engine.refresh().await;

    assert_eq!(device.engine.habits(), vec![habit]);
    assert_eq!(remote.rows(RemoteTable::Habits).len(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_first_fetch_defers_seeding() -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(MemoryRemote::new());
    let device = TestDevice::signed_in(&remote, "u1")?;

    remote.set_offline(true);
    let report = device.engine.refresh().await;
    assert_eq!(report.habits, LoadOutcome::LocalOnly);
    assert!(device.engine.habits().is_empty());

    remote.set_offline(false);
    device.engine.refresh().await;
    assert_eq!(device.engine.habits().len(), 4);
    Ok(())
}

// ============================================================================
// Definition changes
// ============================================================================

#[tokio::test]
async fn offline_deletion_converges_by_set_difference() -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(MemoryRemote::new());
    let first = TestDevice::signed_in(&remote, "u1")?;
    first.engine.refresh().await;

    let device = TestDevice::signed_in(&remote, "u1")?;
    device.engine.refresh().await;
    let before = device.engine.habits();
    assert_eq!(before.len(), 4);

    remote.set_offline(true);
    let removed = device.engine.delete_habit(before[1].id)?;
    let walk = device.engine.add_habit("Evening walk", "footprints", "teal")?;
    device.engine.settle().await;
    assert_eq!(remote.rows(RemoteTable::Habits).len(), 4);

    remote.set_offline(false);
    let report = device.engine.refresh().await;
    assert_eq!(report.habits, LoadOutcome::Reconciled);

    let local = device.engine.habits();
    assert_eq!(local.len(), 4);
    assert!(local.iter().any(|h| h.id == walk.id));
    assert_eq!(remote_ids(&remote)?, ids(&local));
    assert_eq!(remote.calls().deleted_ids, vec![removed.id.to_string()]);
    Ok(())
}

#[tokio::test]
async fn signed_in_changes_push_immediately() -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(MemoryRemote::new());
    let device = TestDevice::signed_in(&remote, "u1")?;
    device.engine.refresh().await;

    let walk = device.engine.add_habit("Evening walk", "footprints", "teal")?;
    device.engine.settle().await;
    assert!(remote_ids(&remote)?.contains(&walk.id));

    device.engine.delete_habit(walk.id)?;
    device.engine.settle().await;
    assert!(!remote_ids(&remote)?.contains(&walk.id));
    assert_eq!(remote_ids(&remote)?, ids(&device.engine.habits()));
    Ok(())
}

#[tokio::test]
async fn habit_deleted_during_load_stays_deleted() -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(MemoryRemote::new());
    let device = TestDevice::signed_in(&remote, "u1")?;
    device.engine.refresh().await;
    let victim = device.engine.habits()[2].id;
    assert!(remote_ids(&remote)?.contains(&victim));

    remote.set_select_delay(Some(Duration::from_millis(100)));
    let engine = device.engine.clone();
    let load = tokio::spawn(async move { engine.refresh().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    device.engine.delete_habit(victim)?;

    let report = load.await?;
    assert_eq!(report.habits, LoadOutcome::Reconciled);
    remote.set_select_delay(None);
    device.engine.settle().await;
    device.engine.refresh().await;
    device.engine.settle().await;

    let local = device.engine.habits();
    assert_eq!(local.len(), 3);
    assert!(!ids(&local).contains(&victim));
    assert!(!remote_ids(&remote)?.contains(&victim));
    assert_eq!(remote_ids(&remote)?, ids(&local));
    Ok(())
}

#[tokio::test]
async fn anonymous_habits_join_the_account_list() -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(MemoryRemote::new());
    let account = Habit::new("Journal", "pen", "rose", wellsync_core::dates::local_now());
    remote.insert(RemoteTable::Habits, &[account.to_row(&UserId::new("u1"))])?;

    let device = TestDevice::new(&remote)?;
    let stretch = device.engine.add_habit("Stretch", "activity", "green")?;

    device.sign_in("u1");
    device.engine.refresh().await;

    let habits = device.engine.habits();
    assert_eq!(habits[0].id, account.id);
    assert!(habits.iter().any(|h| h.id == stretch.id));
    assert_eq!(remote_ids(&remote)?, ids(&habits));
    assert!(remote.calls().deleted_ids.is_empty());
    Ok(())
}

#[tokio::test]
async fn deleting_unknown_habit_fails() -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(MemoryRemote::new());
    let device = TestDevice::new(&remote)?;

    let result = device.engine.delete_habit(HabitId::new());
    assert!(matches!(result, Err(EngineError::HabitNotFound(_))));
    Ok(())
}

// ============================================================================
// Completions and progress
// ============================================================================

#[tokio::test]
async fn progress_ignores_deleted_habits() -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(MemoryRemote::new());
    let device = TestDevice::new(&remote)?;
    device.engine.refresh().await;
    let habits = device.engine.habits();
    let day = date("2024-06-01");

    device.engine.toggle_habit(day, habits[0].id)?;
    device.engine.toggle_habit(day, habits[1].id)?;
    assert_eq!(
        device.engine.habit_progress(day),
        HabitProgress { completed: 2, total: 4 }
    );

    device.engine.delete_habit(habits[0].id)?;
    assert_eq!(
        device.engine.habit_progress(day),
        HabitProgress { completed: 1, total: 3 }
    );

    // History keeps the deleted id.
    let log = &device.engine.habit_completions()[0];
    assert!(log.is_completed(habits[0].id));
    Ok(())
}

#[tokio::test]
async fn completion_log_is_one_row_per_day() -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(MemoryRemote::new());
    let device = TestDevice::signed_in(&remote, "u1")?;
    device.engine.refresh().await;
    let habits = device.engine.habits();
    let day = date("2024-06-01");

    device.engine.set_habit_completed(day, habits[0].id, true)?;
    device.engine.set_habit_completed(day, habits[2].id, true)?;
    device.engine.toggle_habit(day, habits[0].id)?;
    device.engine.settle().await;

    let rows: Vec<CompletionRow> = remote.rows_as(RemoteTable::HabitCompletions)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].date, day);
    assert_eq!(rows[0].completed_habit_ids, vec![habits[2].id]);

    let other = TestDevice::signed_in(&remote, "u1")?;
    other.engine.refresh().await;
    assert_eq!(
        other.engine.habit_progress(day),
        HabitProgress { completed: 1, total: 4 }
    );
    Ok(())
}
