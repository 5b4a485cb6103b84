//! scrambledb coordinator - the scrambling engine
//!
//! Given a source table, a scrambling method and options, builds and runs
//! the plan that materializes the scrambled table, then hands back the
//! metadata record describing its block and tier layout.

pub mod coordinator;
pub mod meta;
pub mod method;
pub mod plan;

pub use coordinator::ScramblingCoordinator;
pub use meta::ScrambleMeta;
pub use method::{
    FastConvergeScramblingMethod, ScramblingMethod, SourceStatistics, UniformScramblingMethod,
};
pub use plan::ScramblingPlan;
