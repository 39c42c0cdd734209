//! Entity resolution: find locations that different sources created for the
//! same physical site and plan how to fold them into one.
//!
//! 1. [`grouping`] maps each `system:value` identifier to the locations that
//!    carry it.
//! 2. [`cluster`] joins groups that share a member into maximal connected
//!    clusters.
//! 3. [`plan`] picks a surviving target per cluster and computes the field
//!    updates and identifier set that absorbing the others requires.

pub mod cluster;
pub mod grouping;
pub mod plan;

pub use cluster::{DisjointSet, find_clusters};
pub use grouping::group_by_external_id;
pub use plan::{
    ClusterConflict, LocationUpdate, MergePlan, PlanSet, plan_cluster_merge, plan_duplicate_merges,
};
