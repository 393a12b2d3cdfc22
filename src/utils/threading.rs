//! # Threading Configuration
//!
//! ## Role
//! Split the user's thread quota between the concurrently running stages.
//!
//! ## Budget Policy
//! The primary aligner (`mm_threads`) and the secondary aligner (`bt_threads`)
//! never run at the same time, but each may overlap with the background index
//! build and the progress monitor. Those two helpers get one reserved thread
//! each, taken out of the quota when they are active. The secondary aligner
//! refuses more than [`BT_THREAD_CEILING`] threads.
//!
//! | force | quota | index present | quiet | mm        | bt              | index | monitor |
//! |-------|-------|---------------|-------|-----------|-----------------|-------|---------|
//! | yes   | 1     | -             | -     | 1         | 1               | 0     | off     |
//! | yes   | 2     | -             | -     | 1         | 2               | 1     | off     |
//! | yes   | >2    | -             | yes   | quota - 1 | min(quota, 53)  | 1     | off     |
//! | yes   | >2    | -             | no    | quota - 2 | min(quota-1, 53)| 1     | on      |
//! | no    | 1     | -             | -     | 1         | 1               | 0     | off     |
//! | no    | 2     | yes           | yes   | 2         | 2               | 0     | off     |
//! | no    | 2     | yes           | no    | 1         | 1               | 0     | on      |
//! | no    | 2     | no            | -     | 1         | 2               | 1     | off     |
//! | no    | >2    | yes           | yes   | quota     | min(quota, 53)  | 0     | off     |
//! | no    | >2    | yes           | no    | quota - 1 | min(quota-1, 53)| 0     | on      |
//! | no    | >2    | no            | yes   | quota - 1 | min(quota, 53)  | 1     | off     |
//! | no    | >2    | no            | no    | quota - 2 | min(quota-1, 53)| 1     | on      |

use crate::error::{Result, SvError};

/// Hard concurrency limit of the secondary aligner
pub const BT_THREAD_CEILING: usize = 53;

/// Per-stage thread allocation, computed once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Primary aligner and in-process detection
    pub mm_threads: usize,
    /// Secondary aligner
    pub bt_threads: usize,
    /// 1 when the index is built on a background thread, else 0
    pub index_threads: usize,
    /// Whether stages get the animated monitor or a static line
    pub monitor_enabled: bool,
}

impl Budget {
    const fn new(mm_threads: usize, bt_threads: usize, index_threads: usize, monitor_enabled: bool) -> Self {
        Self {
            mm_threads,
            bt_threads,
            index_threads,
            monitor_enabled,
        }
    }

    /// Whether the index build overlaps the first stage
    pub fn builds_index_in_background(&self) -> bool {
        self.index_threads == 1
    }
}

/// Compute the thread budget.
///
/// `quota` must be at least 1; [`validate_quota`] enforces that upstream.
pub fn plan(force: bool, quota: usize, quiet: bool, index_present: bool) -> Budget {
    debug_assert!(quota >= 1, "thread quota must be validated before planning");
    let bt = |n: usize| n.min(BT_THREAD_CEILING);

    match (force, quota, index_present, quiet) {
        (true, 0..=1, _, _) => Budget::new(1, 1, 0, false),
        (true, 2, _, _) => Budget::new(1, 2, 1, false),
        (true, q, _, true) => Budget::new(q - 1, bt(q), 1, false),
        (true, q, _, false) => Budget::new(q - 2, bt(q - 1), 1, true),

        (false, 0..=1, _, _) => Budget::new(1, 1, 0, false),
        (false, 2, true, true) => Budget::new(2, 2, 0, false),
        (false, 2, true, false) => Budget::new(1, 1, 0, true),
        (false, 2, false, _) => Budget::new(1, 2, 1, false),
        (false, q, true, true) => Budget::new(q, bt(q), 0, false),
        (false, q, true, false) => Budget::new(q - 1, bt(q - 1), 0, true),
        (false, q, false, true) => Budget::new(q - 1, bt(q), 1, false),
        (false, q, false, false) => Budget::new(q - 2, bt(q - 1), 1, true),
    }
}

/// Reject quotas the planner is not defined for
pub fn validate_quota(quota: usize) -> Result<usize> {
    if quota < 1 {
        return Err(SvError::config(format!(
            "thread quota must be at least 1, got {}",
            quota
        )));
    }
    Ok(quota)
}

/// How the secondary aligner's index gets built during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPlan {
    /// Built on a background thread launched at `IndexAndAlign`
    Background,
    /// Built synchronously right before `SecondaryAlign`
    Inline,
    /// An existing index is reused
    Reuse,
}

impl IndexPlan {
    pub fn resolve(budget: &Budget, force: bool, index_present: bool) -> Self {
        if budget.builds_index_in_background() {
            IndexPlan::Background
        } else if force || !index_present {
            IndexPlan::Inline
        } else {
            IndexPlan::Reuse
        }
    }
}
