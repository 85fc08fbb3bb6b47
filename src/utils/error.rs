use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),


    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

impl ReportError {
    pub fn user_friendly_message(&self) -> String {
        match self {
            ReportError::MissingConfigError { field } => {
                format!("Missing required setting '{}'", field)
            }
            ReportError::InvalidConfigValueError { field, reason, .. } => {
                format!("Setting '{}' is invalid: {}", field, reason)
            }
            ReportError::ConfigError { message } => format!("Configuration problem: {}", message),
            ReportError::ApiError(e) => format!("Could not reach the CRM API: {}", e),
            ReportError::IoError(e) => format!("Could not write the report: {}", e),
            other => other.to_string(),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ReportError::MissingConfigError { .. } => {
                "Set HUBSPOT_ACCESS_TOKEN in the environment or in a .env file"
            }
            ReportError::InvalidConfigValueError { .. } | ReportError::ConfigError { .. } => {
                "Check the command line flags and the report TOML file"
            }
            ReportError::ApiError(_) => "Check network connectivity and the API base URL",
            ReportError::IoError(_) | ReportError::CsvError(_) => {
                "Check that the output path exists and is writable"
            }
            _ => "Re-run with --verbose for more details",
        }
    }

    /// CLI 的程序結束碼
    pub fn exit_code(&self) -> i32 {
        match self {
            ReportError::MissingConfigError { .. }
            | ReportError::InvalidConfigValueError { .. }
            | ReportError::ConfigError { .. }
            | ReportError::ValidationError { .. } => 1,
            ReportError::IoError(_) | ReportError::CsvError(_) => 2,
            _ => 3,
        }
    }
}

/// 單一搜尋查詢的失敗，由彙總器處理，不會中止整次執行
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("request rejected with {status}: {message}")]
    Rejected {
        status: u16,
        message: String,
        filters: String,
    },

    #[error("could not decode search response: {0}")]
    Decode(String),

    #[error("pagination cursor '{0}' was returned twice")]
    CursorLoop(String),
}

impl SearchError {
    /// Whether another attempt may succeed (network trouble, 5xx, rate limiting).
    pub fn is_transient(&self) -> bool {
        match self {
            SearchError::Transport(_) => true,
            SearchError::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;
