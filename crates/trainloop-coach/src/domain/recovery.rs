//! Muscle-group recovery windows.
//!
//! A generated plan must not schedule a muscle group before its recovery
//! window since the last session working it has elapsed. Windows are fixed
//! per group; larger groups need longer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The muscle groups a session can target.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MuscleGroup {
    Chest,
    Back,
    Legs,
    Shoulders,
    Arms,
    Core,
}

impl MuscleGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            MuscleGroup::Chest => "chest",
            MuscleGroup::Back => "back",
            MuscleGroup::Legs => "legs",
            MuscleGroup::Shoulders => "shoulders",
            MuscleGroup::Arms => "arms",
            MuscleGroup::Core => "core",
        }
    }

    /// Hours this group needs between sessions.
    pub fn recovery_hours(&self) -> i64 {
        match self {
            MuscleGroup::Legs => 72,
            MuscleGroup::Chest | MuscleGroup::Back | MuscleGroup::Shoulders => 48,
            MuscleGroup::Arms | MuscleGroup::Core => 24,
        }
    }
}

impl fmt::Display for MuscleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MuscleGroup {
    type Err = UnknownMuscleGroup;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chest" => Ok(MuscleGroup::Chest),
            "back" => Ok(MuscleGroup::Back),
            "legs" => Ok(MuscleGroup::Legs),
            "shoulders" => Ok(MuscleGroup::Shoulders),
            "arms" => Ok(MuscleGroup::Arms),
            "core" => Ok(MuscleGroup::Core),
            other => Err(UnknownMuscleGroup(other.to_string())),
        }
    }
}

/// Error for muscle groups outside the closed set.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown muscle group: {0}")]
pub struct UnknownMuscleGroup(pub String);

/// Recovery state of one muscle group relative to its last session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecoveryWindow {
    pub group: MuscleGroup,
    /// When the group was last worked.
    pub last_worked_at: DateTime<Utc>,
    /// When the group is trainable again.
    pub ready_at: DateTime<Utc>,
}

impl RecoveryWindow {
    pub fn new(group: MuscleGroup, last_worked_at: DateTime<Utc>) -> Self {
        Self {
            group,
            last_worked_at,
            ready_at: last_worked_at + Duration::hours(group.recovery_hours()),
        }
    }

    pub fn is_recovered(&self, now: DateTime<Utc>) -> bool {
        now >= self.ready_at
    }
}
