use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const DEFAULT_RETENTION_DAYS: usize = 30;
pub const DEFAULT_MAX_DAILY_ML: u32 = 5000;

/// Starter habit inserted the first time a habit list is loaded empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitTemplate {
    pub title: String,
    pub icon: String,
    pub color_token: String,
}

impl HabitTemplate {
    pub fn new(title: &str, icon: &str, color_token: &str) -> Self {
        Self {
            title: title.to_string(),
            icon: icon.to_string(),
            color_token: color_token.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Newest days kept per series after a load cycle.
    pub retention_days: usize,
    pub max_daily_ml: u32,
    pub default_habits: Vec<HabitTemplate>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            max_daily_ml: DEFAULT_MAX_DAILY_ML,
            default_habits: vec![
                HabitTemplate::new("Drink water", "droplet", "sky"),
                HabitTemplate::new("Morning stretch", "activity", "green"),
                HabitTemplate::new("Read 10 pages", "book", "amber"),
                HabitTemplate::new("Meditate", "wind", "violet"),
            ],
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CoreError::Serialization(e.to_string()))?;
        if config.retention_days == 0 {
            return Err(CoreError::InvalidValue("retentionDays must be at least 1".into()));
        }
        Ok(config)
    }
}
