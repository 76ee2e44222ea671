//! Evaluation cycle stamps.

use std::time::SystemTime;

/// Stamp of one evaluation cycle: the wall-clock time the cycle ran at and a
/// monotonically increasing cycle id.
///
/// The id orders cycles even when two run at the same wall-clock instant, so
/// "did this element change since I last looked" compares ids, never times.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct UpdateContext {
    time: SystemTime,
    update_id: u64,
}

impl UpdateContext {
    /// The before-any-cycle sentinel: id 0 at the Unix epoch. Elements that
    /// have never changed carry this stamp.
    pub const fn none() -> Self {
        Self {
            time: SystemTime::UNIX_EPOCH,
            update_id: 0,
        }
    }

    pub(crate) fn next(&self, time: SystemTime) -> Self {
        Self {
            time,
            update_id: self.update_id + 1,
        }
    }

    /// Wall-clock time of the cycle.
    pub fn time(&self) -> SystemTime {
        self.time
    }

    /// Monotonic cycle id; 0 means no cycle has run.
    pub fn update_id(&self) -> u64 {
        self.update_id
    }

    /// Whether this stamp belongs to a later cycle than `other`.
    pub fn is_newer_than(&self, other: &UpdateContext) -> bool {
        self.update_id > other.update_id
    }
}

impl Default for UpdateContext {
    fn default() -> Self {
        Self::none()
    }
}
