/// Progress snapshot of a download or of an operation aggregating several.
///
/// `is_valid` is false until a total size is known; consumers should treat
/// an invalid status as "in flight, extent unknown" rather than 0%.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressStatus {
    /// Identifier of the operation this snapshot belongs to; `0` when the
    /// producer has no operation attached.
    pub id: u64,
    /// Completion ratio in `[0.0, 1.0]`, derived from the byte counts.
    pub percent: f32,
    pub completed_bytes: u64,
    pub total_bytes: u64,
    pub is_valid: bool,
}

impl ProgressStatus {
    pub const fn invalid(id: u64) -> Self {
        Self {
            id,
            percent: 0.0,
            completed_bytes: 0,
            total_bytes: 0,
            is_valid: false,
        }
    }

    pub fn from_counts(id: u64, completed_bytes: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes == 0 {
            0.0
        } else {
            (completed_bytes as f32 / total_bytes as f32).min(1.0)
        };
        Self {
            id,
            percent,
            completed_bytes,
            total_bytes,
            is_valid: total_bytes > 0,
        }
    }

    /// Snapshot representing finished work of a known or unknown size.
    pub fn completed(id: u64, total_bytes: u64) -> Self {
        Self {
            id,
            percent: 1.0,
            completed_bytes: total_bytes,
            total_bytes,
            is_valid: true,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    /// Fold another snapshot into this one, summing byte counts. The result
    /// is only valid if both sides were.
    pub fn merge(&mut self, other: &ProgressStatus) {
        self.completed_bytes += other.completed_bytes;
        self.total_bytes += other.total_bytes;
        self.is_valid = self.is_valid && other.is_valid;
        self.percent = if self.total_bytes == 0 {
            0.0
        } else {
            (self.completed_bytes as f32 / self.total_bytes as f32).min(1.0)
        };
    }
}
