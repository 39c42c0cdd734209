//! Repository traits for metadata operations.

pub mod availability;
pub mod availability_log;
pub mod external_ids;
pub mod locations;
pub mod merges;

pub use availability::AvailabilityRepo;
pub use availability_log::AvailabilityLogRepo;
pub use external_ids::ExternalIdRepo;
pub use locations::{LocationFilter, LocationRepo};
pub use merges::{MergeRepo, MergeStats};
