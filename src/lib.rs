pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::CliConfig;

pub use crate::adapters::{HubSpotSearchClient, LocalStorage, SearchClientConfig};
pub use crate::config::ReportConfig;
pub use crate::core::{
    aggregator::MetricAggregator, date_range::generate_month_ranges, engine::ReportEngine,
};
pub use crate::utils::error::{ReportError, Result, SearchError};
