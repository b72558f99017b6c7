//! Read-only queue depth reporting.

use conveyor_core::Stage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::{SchedulerResult, StageQueue};

/// Queued jobs per stage, in pipeline order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct QueueStats(BTreeMap<Stage, u64>);

impl QueueStats {
    pub fn get(&self, stage: Stage) -> u64 {
        self.0.get(&stage).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, u64)> + '_ {
        self.0.iter().map(|(stage, depth)| (*stage, *depth))
    }
}

impl FromIterator<(Stage, u64)> for QueueStats {
    fn from_iter<I: IntoIterator<Item = (Stage, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (stage, depth) in self.iter() {
            writeln!(f, "{:<12} {}", stage, depth)?;
        }
        Ok(())
    }
}

pub struct QueueInspector {
    queue: StageQueue,
}

impl QueueInspector {
    pub fn new(queue: StageQueue) -> Self {
        Self { queue }
    }

    /// Current depth of every known stage.
    pub async fn stats(&self) -> SchedulerResult<QueueStats> {
        let mut stats = BTreeMap::new();
        for stage in Stage::ALL {
            stats.insert(stage, self.queue.depth(stage).await?);
        }
        Ok(QueueStats(stats))
    }
}
