use crate::utils::error::{ReportError, Result};
use std::collections::HashSet;
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(ReportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: "URL cannot be empty".to_string(),
        });
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(ReportError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: url_str.to_string(),
                reason: format!("Unsupported URL scheme: {}", scheme),
            }),
        },
        Err(e) => Err(ReportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: format!("Invalid URL format: {}", e),
        }),
    }
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(ReportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(ReportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| ReportError::MissingConfigError {
        field: field_name.to_string(),
    })
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ReportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(ReportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

/// 標籤是彙總結果的鍵，同一張表不可重複
pub fn validate_unique_labels<'a, I>(field_name: &str, labels: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for label in labels {
        if !seen.insert(label) {
            return Err(ReportError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: label.to_string(),
                reason: "Duplicate label".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("api.base_url", "https://api.hubapi.com").is_ok());
        assert!(validate_url("api.base_url", "http://127.0.0.1:8080").is_ok());
        assert!(validate_url("api.base_url", "").is_err());
        assert!(validate_url("api.base_url", "api.hubapi.com").is_err());
        assert!(validate_url("api.base_url", "ftp://example.com").is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("api.page_size", 100, 1, 200).is_ok());
        assert!(validate_range("api.page_size", 0, 1, 200).is_err());
        assert!(validate_range("api.page_size", 201, 1, 200).is_err());
    }

    #[test]
    fn test_validate_required_field() {
        let token: Option<String> = None;
        let err = validate_required_field("access_token", &token).unwrap_err();
        assert!(matches!(err, ReportError::MissingConfigError { field } if field == "access_token"));

        let token = Some("pat-123".to_string());
        assert_eq!(validate_required_field("access_token", &token).unwrap(), "pat-123");
    }

    #[test]
    fn test_validate_unique_labels() {
        assert!(validate_unique_labels("metrics", ["Spain", "Ireland"]).is_ok());
        assert!(validate_unique_labels("metrics", ["Spain", "Spain"]).is_err());
    }

    #[test]
    fn test_validate_non_empty_string() {
        assert!(validate_non_empty_string("title", "Leads").is_ok());
        assert!(validate_non_empty_string("title", "   ").is_err());
    }
}
