//! churnlens: customer churn intelligence for a telecom subscriber base
//!
//! Loads the churn dataset once, filters it per page, aggregates KPIs and
//! breakdown tables, and segments customers into CLTV and churn-risk terciles
//! with a retention priority.

pub mod aggregate;
pub mod cli;
pub mod data;
pub mod error;
pub mod filter;
pub mod pages;
pub mod segment;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use data::{churned, load, load_table, CustomerRecord, Dimension, Measure, Table};
pub use error::{ChurnError, CoreResult};
pub use filter::{filter, FilterCriteria, View};
pub use pages::{Dashboard, Page, PageFilters, PageOutcome, PageReport};
pub use segment::{segment, tercile_edges, RetentionPriority, RiskTier, ValueTier};

/// Common result type used by the application layer
pub type Result<T> = anyhow::Result<T>;
