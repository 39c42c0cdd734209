//! Duplicate location merge execution.

use crate::error::MetadataResult;
use async_trait::async_trait;
use std::ops::AddAssign;
use time::OffsetDateTime;
use univaf_core::MergePlan;

/// What one committed merge did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Donor availability rows re-pointed at a source the target lacked.
    pub availability_moved: u64,
    /// Donor rows that replaced an older target row for the same source.
    pub availability_replaced: u64,
    /// Donor rows dropped because the target's row was at least as fresh.
    pub availability_discarded: u64,
    pub log_entries_moved: u64,
    pub external_ids_added: u64,
    pub external_ids_removed: u64,
    pub donors_deleted: u64,
}

impl AddAssign for MergeStats {
    fn add_assign(&mut self, other: Self) {
        self.availability_moved += other.availability_moved;
        self.availability_replaced += other.availability_replaced;
        self.availability_discarded += other.availability_discarded;
        self.log_entries_moved += other.log_entries_moved;
        self.external_ids_added += other.external_ids_added;
        self.external_ids_removed += other.external_ids_removed;
        self.donors_deleted += other.donors_deleted;
    }
}

/// Repository for merge execution.
#[async_trait]
pub trait MergeRepo: Send + Sync {
    /// Apply a plan inside a single transaction.
    ///
    /// Target fields and meta keys are only filled where still missing.
    /// `plan.external_ids` are added to the target and only
    /// `plan.removed_external_ids` are deleted; any other id a donor holds is
    /// re-pointed to the target. Donor availability moves over only when it
    /// is fresher than the target's row for the same source, donor history is
    /// re-pointed, and donors are deleted. Any failure rolls back the whole
    /// plan.
    async fn execute_merge(
        &self,
        plan: &MergePlan,
        merged_at: OffsetDateTime,
    ) -> MetadataResult<MergeStats>;
}
