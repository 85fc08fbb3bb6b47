use crate::adapters::http::{SearchClientConfig, DEFAULT_BASE_URL};
use crate::core::report::{RowSource, RowSpec, SectionLayout};
use crate::domain::model::{
    AggregationMode, BreakdownProperty, CrmObject, Dimension, Filter, FilterSpec, FilterValue,
    MetricSpec, PropertyKind,
};
use crate::utils::error::{ReportError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 內建報表，未指定 `--config` 時使用
pub const BUILTIN_REPORT: &str = include_str!("../../config/report.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub output: OutputConfig,
    pub sections: Vec<SectionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_page_size() -> u32 {
    100
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_seconds: default_timeout_seconds(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_filename_prefix")]
    pub filename_prefix: String,
}

fn default_filename_prefix() -> String {
    "crm_report".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            filename_prefix: default_filename_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionConfig {
    pub title: String,
    pub object: CrmObject,
    pub date_property: Option<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// 加總此屬性而不是計算筆數
    pub sum_property: Option<String>,
    /// 指標值要比對的分類屬性
    pub property: Option<String>,
    #[serde(default)]
    pub kind: PropertyKind,
    pub pipeline_property: Option<String>,
    #[serde(default)]
    pub pipelines: Vec<String>,
    pub metrics: Vec<MetricEntry>,
    #[serde(default)]
    pub layout: Vec<LayoutEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEntry {
    pub label: String,
    pub value: Option<FilterValue>,
    #[serde(default)]
    pub skip: bool,
    #[serde(default)]
    pub missing: bool,
}

impl MetricEntry {
    pub fn filter_spec(&self) -> Result<FilterSpec> {
        match (&self.value, self.skip, self.missing) {
            (None, false, false) => Ok(FilterSpec::All),
            (None, true, false) => Ok(FilterSpec::Skip),
            (None, false, true) => Ok(FilterSpec::Missing),
            (Some(value), false, false) => Ok(FilterSpec::Value(value.clone())),
            _ => Err(ReportError::InvalidConfigValueError {
                field: format!("metrics.{}", self.label),
                value: format!("{:?}", self.value),
                reason: "Use at most one of value, skip and missing".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutEntry {
    pub label: String,
    pub metric: Option<String>,
    #[serde(default)]
    pub sum_of: Vec<String>,
}

impl SectionConfig {
    pub fn dimension(&self) -> Dimension {
        let mode = match &self.sum_property {
            Some(property) => AggregationMode::Sum(property.clone()),
            None => AggregationMode::Count,
        };

        let mut dimension = Dimension::new(self.object, mode);
        if let Some(date_property) = &self.date_property {
            dimension.date_property = date_property.clone();
        }
        if let Some(pipeline_property) = &self.pipeline_property {
            dimension.pipeline_property = pipeline_property.clone();
        }
        dimension.base_filters = self.filters.clone();
        dimension.pipelines = self.pipelines.clone();
        dimension.property = self.property.as_ref().map(|name| BreakdownProperty {
            name: name.clone(),
            kind: self.kind,
        });
        dimension
    }

    pub fn metric_specs(&self) -> Result<Vec<MetricSpec>> {
        self.metrics
            .iter()
            .map(|entry| {
                Ok(MetricSpec {
                    label: entry.label.clone(),
                    filter: entry.filter_spec()?,
                })
            })
            .collect()
    }

    /// The explicit layout, or one row per metric in declaration order.
    pub fn layout(&self) -> SectionLayout {
        let rows = if self.layout.is_empty() {
            self.metrics
                .iter()
                .map(|m| RowSpec::metric(&m.label, &m.label))
                .collect()
        } else {
            self.layout
                .iter()
                .map(|entry| RowSpec {
                    label: entry.label.clone(),
                    source: match &entry.metric {
                        Some(metric) => RowSource::Metric(metric.clone()),
                        None => RowSource::SumOf(entry.sum_of.clone()),
                    },
                })
                .collect()
        };

        SectionLayout {
            title: self.title.clone(),
            rows,
        }
    }

    fn validate_section(&self, index: usize) -> Result<()> {
        let field = |name: &str| format!("sections[{}].{}", index, name);

        validation::validate_non_empty_string(&field("title"), &self.title)?;
        if self.metrics.is_empty() {
            return Err(ReportError::InvalidConfigValueError {
                field: field("metrics"),
                value: self.title.clone(),
                reason: "A section needs at least one metric".to_string(),
            });
        }
        validation::validate_unique_labels(
            &field("metrics"),
            self.metrics.iter().map(|m| m.label.as_str()),
        )?;

        for filter in &self.filters {
            filter.validate()?;
        }
        if self.pipelines.iter().any(|p| p.trim().is_empty()) {
            return Err(ReportError::InvalidConfigValueError {
                field: field("pipelines"),
                value: format!("{:?}", self.pipelines),
                reason: "Pipeline ids cannot be empty".to_string(),
            });
        }

        for spec in self.metric_specs()? {
            let needs_property = matches!(spec.filter, FilterSpec::Value(_) | FilterSpec::Missing);
            if needs_property && self.property.is_none() {
                return Err(ReportError::InvalidConfigValueError {
                    field: field("property"),
                    value: spec.label,
                    reason: "Metrics with value or missing need a breakdown property".to_string(),
                });
            }
        }

        for entry in &self.layout {
            let references: Vec<&String> = match (&entry.metric, entry.sum_of.is_empty()) {
                (Some(metric), true) => vec![metric],
                (None, false) => entry.sum_of.iter().collect(),
                _ => {
                    return Err(ReportError::InvalidConfigValueError {
                        field: field("layout"),
                        value: entry.label.clone(),
                        reason: "A layout row needs exactly one of metric or sum_of".to_string(),
                    })
                }
            };

            for reference in references {
                if !self.metrics.iter().any(|m| &m.label == reference) {
                    return Err(ReportError::InvalidConfigValueError {
                        field: field("layout"),
                        value: reference.clone(),
                        reason: format!("Row '{}' refers to an unknown metric", entry.label),
                    });
                }
            }
        }

        Ok(())
    }
}

impl ReportConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(ReportError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_REPORT)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| ReportError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` and `${VAR:-fallback}`. Unset variables without a fallback stay as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").map_err(|e| {
            ReportError::ConfigError {
                message: format!("invalid placeholder pattern: {}", e),
            }
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match (std::env::var(var_name), caps.get(2)) {
                (Ok(value), _) => value,
                (Err(_), Some(fallback)) => fallback.as_str().to_string(),
                (Err(_), None) => {
                    tracing::warn!("Environment variable {} is not set", var_name);
                    caps[0].to_string()
                }
            }
        });

        Ok(result.to_string())
    }

    pub fn layouts(&self) -> Vec<SectionLayout> {
        self.sections.iter().map(SectionConfig::layout).collect()
    }

    pub fn client_config(&self, access_token: &str) -> SearchClientConfig {
        let mut config = SearchClientConfig::new(&self.api.base_url, access_token);
        config.page_size = self.api.page_size;
        config.timeout = Duration::from_secs(self.api.timeout_seconds);
        config.retry_attempts = self.api.retry_attempts;
        config.retry_delay = Duration::from_millis(self.api.retry_delay_ms);
        config
    }
}

impl Validate for ReportConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_url("api.base_url", &self.api.base_url)?;
        validation::validate_range("api.page_size", self.api.page_size, 1, 200)?;
        validation::validate_range("api.timeout_seconds", self.api.timeout_seconds, 1, 600)?;
        validation::validate_range("api.retry_attempts", self.api.retry_attempts, 0, 10)?;
        validation::validate_range("api.retry_delay_ms", self.api.retry_delay_ms, 0, 60_000)?;
        validation::validate_path("output.filename_prefix", &self.output.filename_prefix)?;

        if self.sections.is_empty() {
            return Err(ReportError::ConfigError {
                message: "the report defines no sections".to_string(),
            });
        }

        for (index, section) in self.sections.iter().enumerate() {
            section.validate_section(index)?;
        }

        Ok(())
    }
}
