use crate::config::report_config::ReportConfig;
use crate::core::aggregator::MetricAggregator;
use crate::core::report::{render_csv, ReportAssembler};
use crate::domain::model::{Dimension, MetricSpec, MetricValue, MonthRange, MonthlyReport};
use crate::domain::ports::{SearchBackend, Storage};
use crate::utils::error::Result;
use chrono::NaiveDate;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub months: usize,
    pub queried: usize,
    pub failed: usize,
    pub skipped: usize,
    /// 沒有可報告的內容時為 `None`
    pub output_path: Option<String>,
}

/// 執行一次報表流程：所有區段、所有月份，最後輸出 CSV
pub struct ReportEngine<B: SearchBackend, S: Storage> {
    backend: B,
    storage: S,
    config: ReportConfig,
}

impl<B: SearchBackend, S: Storage> ReportEngine<B, S> {
    pub fn new(backend: B, storage: S, config: ReportConfig) -> Self {
        Self {
            backend,
            storage,
            config,
        }
    }

    pub async fn build_report(&self, months: &[MonthRange]) -> Result<(MonthlyReport, RunSummary)> {
        let tables: Vec<(Dimension, Vec<MetricSpec>)> = self
            .config
            .sections
            .iter()
            .map(|section| -> Result<(Dimension, Vec<MetricSpec>)> {
                Ok((section.dimension(), section.metric_specs()?))
            })
            .collect::<Result<_>>()?;

        let aggregator = MetricAggregator::new(&self.backend);
        let mut assembler = ReportAssembler::new(self.config.layouts());
        let mut summary = RunSummary {
            months: months.len(),
            ..RunSummary::default()
        };

        for month in months {
            tracing::info!("📅 Processing {}", month.label);
            let mut results = Vec::with_capacity(tables.len());

            for (section, (dimension, metrics)) in self.config.sections.iter().zip(&tables) {
                tracing::debug!("{}: {} metric(s)", section.title, metrics.len());
                let result = aggregator.aggregate(&month.range, dimension, metrics).await;

                for (_, value) in result.iter() {
                    match value {
                        MetricValue::Skipped => summary.skipped += 1,
                        MetricValue::Failed => {
                            summary.queried += 1;
                            summary.failed += 1;
                        }
                        _ => summary.queried += 1,
                    }
                }
                results.push(result);
            }

            assembler.push_month(&month.label, &results);
        }

        Ok((assembler.finish(), summary))
    }

    pub async fn run(&self, months: &[MonthRange], report_date: NaiveDate) -> Result<RunSummary> {
        if months.is_empty() {
            tracing::info!("Reporting window is empty, nothing to report");
            return Ok(RunSummary::default());
        }

        tracing::info!(
            "Starting report for {} month(s): {} .. {}",
            months.len(),
            months[0].label,
            months[months.len() - 1].label
        );

        let (report, mut summary) = self.build_report(months).await?;
        let csv = render_csv(&report)?;

        let filename = format!(
            "{}_{}.csv",
            self.config.output.filename_prefix,
            report_date.format("%Y-%m-%d")
        );
        tracing::debug!("Writing report ({} bytes) to storage", csv.len());
        self.storage.write_file(&filename, csv.as_bytes()).await?;

        let location = self.storage.location(&filename);
        if summary.failed > 0 {
            tracing::warn!(
                "⚠️ {} of {} queries failed; their cells are empty",
                summary.failed,
                summary.queried
            );
        }
        tracing::info!(
            "Report done: {} queries, {} manual rows, saved to {}",
            summary.queried,
            summary.skipped,
            location
        );

        summary.output_path = Some(location);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{AggregationMode, QuerySpec, TimeRange};
    use crate::utils::error::SearchError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone)]
    struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        fn new() -> Self {
            Self {
                files: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned()
        }
    }

    impl Storage for MockStorage {
        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            let mut files = self.files.lock().await;
            files.insert(path.to_string(), data.to_vec());
            Ok(())
        }

        fn location(&self, path: &str) -> String {
            format!("memory://{}", path)
        }
    }

    /// Counts 10 per query except in the second month, where sums fail.
    struct MonthlyBackend {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl SearchBackend for MonthlyBackend {
        async fn search(&self, query: &QuerySpec) -> std::result::Result<MetricValue, SearchError> {
            *self.calls.lock().await += 1;
            match &query.mode {
                AggregationMode::Count => Ok(MetricValue::Count(10)),
                AggregationMode::Sum(_) if query.time_range.start >= 2_000 => {
                    Err(SearchError::Server {
                        status: 502,
                        message: "bad gateway".to_string(),
                    })
                }
                AggregationMode::Sum(_) => Ok(MetricValue::Sum(99.5)),
            }
        }
    }

    const CONFIG: &str = r#"
[[sections]]
title = "Leads"
object = "contacts"
property = "hs_analytics_source"
metrics = [
    { label = "Total" },
    { label = "Paid Social", value = "PAID_SOCIAL" },
    { label = "Events", skip = true },
]

[[sections]]
title = "Revenue"
object = "deals"
sum_property = "amount"
metrics = [{ label = "Amount" }]
"#;

    fn months() -> Vec<MonthRange> {
        vec![
            MonthRange {
                label: "Jan 2025".to_string(),
                range: TimeRange::new(1_000, 2_000),
            },
            MonthRange {
                label: "Feb 2025".to_string(),
                range: TimeRange::new(2_000, 3_000),
            },
        ]
    }

    fn report_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 2).unwrap()
    }

    #[tokio::test]
    async fn test_run_writes_csv_and_counts_outcomes() {
        let storage = MockStorage::new();
        let backend = MonthlyBackend {
            calls: Mutex::new(0),
        };
        let config = ReportConfig::from_toml_str(CONFIG).unwrap();
        let engine = ReportEngine::new(backend, storage.clone(), config);

        let summary = engine.run(&months(), report_date()).await.unwrap();

        assert_eq!(summary.months, 2);
        assert_eq!(summary.queried, 6);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(
            summary.output_path.as_deref(),
            Some("memory://crm_report_2025-03-02.csv")
        );
        assert_eq!(*engine.backend.calls.lock().await, 6);

        let csv = String::from_utf8(storage.get_file("crm_report_2025-03-02.csv").await.unwrap())
            .unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Metric,Jan 2025,Feb 2025");
        assert_eq!(lines[1], "Leads,,");
        assert_eq!(lines[2], "Total,10,10");
        assert_eq!(lines[4], "Events,MANUAL,MANUAL");
        assert_eq!(lines[7], "Amount,99.50,");
    }

    #[tokio::test]
    async fn test_empty_window_is_a_no_op() {
        let storage = MockStorage::new();
        let backend = MonthlyBackend {
            calls: Mutex::new(0),
        };
        let config = ReportConfig::from_toml_str(CONFIG).unwrap();
        let engine = ReportEngine::new(backend, storage.clone(), config);

        let summary = engine.run(&[], report_date()).await.unwrap();

        assert_eq!(summary, RunSummary::default());
        assert_eq!(*engine.backend.calls.lock().await, 0);
        assert!(storage.get_file("crm_report_2025-03-02.csv").await.is_none());
    }
}
