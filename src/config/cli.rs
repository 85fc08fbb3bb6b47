use crate::core::date_range::{first_of_month, months_before, parse_month};
use crate::utils::error::{ReportError, Result};
use crate::utils::validation::{self, Validate};
use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "crm-report")]
#[command(about = "Monthly marketing and sales report from CRM contact and deal searches")]
pub struct CliConfig {
    #[arg(long, env = "HUBSPOT_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    #[arg(long, help = "Report definition (TOML); the built-in report is used when omitted")]
    pub config: Option<String>,

    #[arg(long, help = "First month to report, YYYY-MM")]
    pub from: Option<String>,

    #[arg(long, help = "Month to stop before, YYYY-MM (defaults to the current month)")]
    pub to: Option<String>,

    #[arg(long, default_value = "1", help = "Months to report when --from is not given")]
    pub months: u32,

    #[arg(long, default_value = "./output")]
    pub output_path: String,

    #[arg(long, help = "Override the API base URL from the report definition")]
    pub base_url: Option<String>,

    #[arg(long, help = "Use UTC month boundaries instead of the local time zone")]
    pub utc: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,
}

impl CliConfig {
    /// 取得 bearer token；缺少時在任何查詢前中止執行
    pub fn require_token(&self) -> Result<&str> {
        let token = validation::validate_required_field("access_token", &self.access_token)?;
        if token.trim().is_empty() {
            return Err(ReportError::MissingConfigError {
                field: "access_token".to_string(),
            });
        }
        Ok(token.as_str())
    }

    /// 報表日期：`--utc` 時取 UTC 日期，否則取本地日期
    pub fn today_at(&self, now: DateTime<Utc>) -> NaiveDate {
        if self.utc {
            now.date_naive()
        } else {
            now.with_timezone(&Local).date_naive()
        }
    }

    /// Resolves `[from, to)` against `today`: `to` defaults to the first of the current
    /// month so the month in progress is left out.
    pub fn report_window(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
        let to = match &self.to {
            Some(raw) => parse_month_arg("to", raw)?,
            None => first_of_month(today),
        };

        let from = match &self.from {
            Some(raw) => parse_month_arg("from", raw)?,
            None => months_before(to, self.months).ok_or_else(|| {
                ReportError::InvalidConfigValueError {
                    field: "months".to_string(),
                    value: self.months.to_string(),
                    reason: "Window starts before the supported date range".to_string(),
                }
            })?,
        };

        Ok((from, to))
    }
}

fn parse_month_arg(field: &str, raw: &str) -> Result<NaiveDate> {
    parse_month(raw).ok_or_else(|| ReportError::InvalidConfigValueError {
        field: field.to_string(),
        value: raw.to_string(),
        reason: "Expected a month as YYYY-MM".to_string(),
    })
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        self.require_token()?;
        validation::validate_path("output_path", &self.output_path)?;
        validation::validate_range("months", self.months, 1, 120)?;
        if let Some(base_url) = &self.base_url {
            validation::validate_url("base_url", base_url)?;
        }
        if let Some(raw) = &self.from {
            parse_month_arg("from", raw)?;
        }
        if let Some(raw) = &self.to {
            parse_month_arg("to", raw)?;
        }
        Ok(())
    }
}
