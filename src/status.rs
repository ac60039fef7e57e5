//! Node status classification
//!
//! Maps a node's last realtime update to an online/warning/offline status.
//! Two threshold sets exist: the node detail view uses the three-tier set,
//! while the dashboard list only distinguishes online from offline at the
//! five-minute boundary. Callers pick a set explicitly.

use chrono::{DateTime, Duration, Utc};

use crate::models::NodeStatus;

/// Explicit threshold set for status classification
#[derive(Debug, Clone, Copy)]
pub struct StatusThresholds {
    /// A node seen within this many minutes is online
    pub online_within_mins: i64,
    /// A node seen within this many minutes (but not online) is in warning;
    /// `None` folds the warning tier into offline
    pub warning_within_mins: Option<i64>,
}

/// Three-tier classification: online / warning / offline
pub const THREE_TIER: StatusThresholds = StatusThresholds {
    online_within_mins: 5,
    warning_within_mins: Some(15),
};

/// Binary classification used by the dashboard node list: online / offline
pub const BINARY: StatusThresholds = StatusThresholds {
    online_within_mins: 5,
    warning_within_mins: None,
};

/// Classify a node's liveness from its last update time.
///
/// A missing timestamp is always offline.
pub fn classify(
    last_update: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    thresholds: &StatusThresholds,
) -> NodeStatus {
    let Some(last_update) = last_update else {
        return NodeStatus::Offline;
    };

    let age = now - last_update;

    if age < Duration::minutes(thresholds.online_within_mins) {
        return NodeStatus::Online;
    }

    if let Some(warning_mins) = thresholds.warning_within_mins {
        if age < Duration::minutes(warning_mins) {
            return NodeStatus::Warning;
        }
    }

    NodeStatus::Offline
}
