pub mod driver;
pub mod fields;
pub mod reconciler;

pub use driver::{seed_taxonomies, PruneReport, SyncDriver, SyncReport};
pub use reconciler::{
    FeaturedImagePolicy, ReconcileError, ReconcileOutcome, ReconcilePolicy, ReconcileStep,
    Reconciler, SkipReason,
};
