use std::fmt;

/// The independently reconciled streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SeriesKind {
    Hydration,
    Sleep,
    Breathing,
    HabitCompletions,
    Habits,
}

impl SeriesKind {
    pub const ALL: [SeriesKind; 5] = [
        Self::Hydration,
        Self::Sleep,
        Self::Breathing,
        Self::HabitCompletions,
        Self::Habits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hydration => "hydration",
            Self::Sleep => "sleep",
            Self::Breathing => "breathing",
            Self::HabitCompletions => "habit_completions",
            Self::Habits => "habits",
        }
    }
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RemoteTable {
    HydrationLogs,
    SleepLogs,
    BreathingSessions,
    Habits,
    HabitCompletions,
}

impl RemoteTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HydrationLogs => "hydration_logs",
            Self::SleepLogs => "sleep_logs",
            Self::BreathingSessions => "breathing_sessions",
            Self::Habits => "habits",
            Self::HabitCompletions => "habit_completions",
        }
    }
}

impl fmt::Display for RemoteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
