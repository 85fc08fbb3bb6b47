pub mod aggregator;
pub mod date_range;
pub mod engine;
pub mod report;

pub use crate::domain::model::{AggregationResult, MetricValue, MonthRange, MonthlyReport};
pub use crate::domain::ports::{SearchBackend, Storage};
pub use crate::utils::error::Result;
