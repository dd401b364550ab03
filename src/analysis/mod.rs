//! Analysis result aggregation.

pub mod aggregator;

pub use aggregator::{aggregate, describe_failures, CorpusSummary};
