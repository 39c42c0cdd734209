//! Finding and merging duplicate locations.

use crate::error::{EngineError, EngineResult};
use crate::export::BatchOptions;
use crate::state::Engine;
use futures::TryStreamExt;
use univaf_core::{ClusterConflict, Location, MergePlan, PlanSet, timestamp};
use univaf_metadata::repos::MergeRepo;
use univaf_metadata::{LocationFilter, MergeStats};
use uuid::Uuid;

/// Parameters for [`Engine::merge_duplicates`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Which locations to consider.
    pub filter: LocationFilter,
    /// Only group by these id systems.
    pub systems: Option<Vec<String>>,
    /// Compare numeric id values without leading zeros.
    pub unpad: bool,
}

/// A planned merge whose execution failed and was rolled back.
#[derive(Debug)]
pub struct MergeFailure {
    pub target: Uuid,
    pub error: EngineError,
}

/// Everything a merge pass did.
#[derive(Debug, Default)]
pub struct MergeReport {
    pub plans: Vec<MergePlan>,
    /// Clusters that could not be planned.
    pub conflicts: Vec<ClusterConflict>,
    pub failures: Vec<MergeFailure>,
    /// Totals over committed plans.
    pub stats: MergeStats,
    pub committed: usize,
}

impl Engine {
    /// Load every location matching `filter`, with external ids.
    pub async fn load_locations(&self, filter: &LocationFilter) -> EngineResult<Vec<Location>> {
        let mut options = BatchOptions::new(self.config.export.batch_size);
        options.filter = filter.clone();

        let batches: Vec<_> = self.iterate_locations(options)?.try_collect().await?;
        Ok(batches.into_iter().flat_map(|b| b.rows).collect())
    }

    /// Plan merges for every duplicate cluster in `locations`.
    pub fn plan_duplicate_merges(
        &self,
        locations: &[Location],
        systems: Option<&[String]>,
        unpad: bool,
    ) -> PlanSet {
        univaf_core::dedup::plan_duplicate_merges(locations, systems, unpad, &self.config.dedup)
    }

    /// Execute `plan` when `persist` is set; otherwise only log it.
    ///
    /// Returns the store's statistics for a committed merge.
    pub async fn commit_merge(
        &self,
        plan: &MergePlan,
        persist: bool,
    ) -> EngineResult<Option<MergeStats>> {
        if !persist {
            tracing::info!(target_id = %plan.target, "Dry run:\n{plan}");
            return Ok(None);
        }

        let stats = self.metadata.execute_merge(plan, timestamp::now()).await?;
        tracing::info!(
            target_id = %plan.target,
            donors = plan.donors.len(),
            updated_fields = ?plan.update.fields(),
            availability_moved = stats.availability_moved,
            availability_replaced = stats.availability_replaced,
            external_ids_added = stats.external_ids_added,
            "Merged duplicate locations"
        );
        Ok(Some(stats))
    }

    /// Find, plan and (with `persist`) merge duplicate locations.
    ///
    /// Clusters are merged one at a time; a failure in one is recorded and
    /// the rest still run.
    pub async fn merge_duplicates(
        &self,
        options: &MergeOptions,
        persist: bool,
    ) -> EngineResult<MergeReport> {
        let locations = self.load_locations(&options.filter).await?;
        let planned =
            self.plan_duplicate_merges(&locations, options.systems.as_deref(), options.unpad);
        tracing::info!(
            locations = locations.len(),
            plans = planned.plans.len(),
            conflicts = planned.conflicts.len(),
            "Planned duplicate merges"
        );

        let mut report = MergeReport {
            conflicts: planned.conflicts,
            ..MergeReport::default()
        };
        for plan in &planned.plans {
            match self.commit_merge(plan, persist).await {
                Ok(Some(stats)) => {
                    report.stats += stats;
                    report.committed += 1;
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::error!(
                        target_id = %plan.target,
                        error = %error,
                        "Merge failed and was rolled back"
                    );
                    report.failures.push(MergeFailure {
                        target: plan.target,
                        error,
                    });
                }
            }
        }
        report.plans = planned.plans;
        Ok(report)
    }
}
