use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::error::ReportError;

/// 半開區間 `[start, end)`，單位為 epoch 毫秒
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        debug_assert!(start < end, "time range must not be empty");
        Self { start, end }
    }
}

/// 一個報表月份：欄位標籤與時間範圍
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthRange {
    pub label: String,
    pub range: TimeRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrmObject {
    Contacts,
    Deals,
}

impl CrmObject {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrmObject::Contacts => "contacts",
            CrmObject::Deals => "deals",
        }
    }

    /// 聯絡人依建立日期、交易依成交日期統計
    pub fn default_date_property(&self) -> &'static str {
        match self {
            CrmObject::Contacts => "createdate",
            CrmObject::Deals => "closedate",
        }
    }
}

impl fmt::Display for CrmObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrmObject {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "contacts" | "contact" => Ok(CrmObject::Contacts),
            "deals" | "deal" => Ok(CrmObject::Deals),
            other => Err(ReportError::InvalidConfigValueError {
                field: "object".to_string(),
                value: other.to_string(),
                reason: "Expected 'contacts' or 'deals'".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    Eq,
    Gte,
    Lt,
    In,
    Contains,
    ContainsToken,
    NotHasProperty,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "EQ",
            FilterOperator::Gte => "GTE",
            FilterOperator::Lt => "LT",
            FilterOperator::In => "IN",
            FilterOperator::Contains => "CONTAINS",
            FilterOperator::ContainsToken => "CONTAINS_TOKEN",
            FilterOperator::NotHasProperty => "NOT_HAS_PROPERTY",
        }
    }
}

impl FromStr for FilterOperator {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "EQ" => Ok(FilterOperator::Eq),
            "GTE" => Ok(FilterOperator::Gte),
            "LT" => Ok(FilterOperator::Lt),
            "IN" => Ok(FilterOperator::In),
            "CONTAINS" => Ok(FilterOperator::Contains),
            "CONTAINS_TOKEN" => Ok(FilterOperator::ContainsToken),
            "NOT_HAS_PROPERTY" => Ok(FilterOperator::NotHasProperty),
            other => Err(ReportError::InvalidConfigValueError {
                field: "operator".to_string(),
                value: other.to_string(),
                reason: "Unknown filter operator".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FilterValue {
    /// 解析命令列值：布林與整數保留型別，其餘視為文字
    pub fn parse_scalar(raw: &str) -> Self {
        match raw {
            "true" => FilterValue::Bool(true),
            "false" => FilterValue::Bool(false),
            _ => raw
                .parse::<i64>()
                .map(FilterValue::Integer)
                .unwrap_or_else(|_| FilterValue::Text(raw.to_string())),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Integer(value)
    }
}

/// 單一搜尋條件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub property: String,
    pub operator: FilterOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<FilterValue>,
}

impl Filter {
    fn with_value(property: &str, operator: FilterOperator, value: FilterValue) -> Self {
        Self {
            property: property.to_string(),
            operator,
            value: Some(value),
        }
    }

    pub fn eq(property: &str, value: impl Into<FilterValue>) -> Self {
        Self::with_value(property, FilterOperator::Eq, value.into())
    }

    pub fn gte(property: &str, value: i64) -> Self {
        Self::with_value(property, FilterOperator::Gte, FilterValue::Integer(value))
    }

    pub fn lt(property: &str, value: i64) -> Self {
        Self::with_value(property, FilterOperator::Lt, FilterValue::Integer(value))
    }

    pub fn is_in(property: &str, values: &[String]) -> Self {
        Self::with_value(property, FilterOperator::In, FilterValue::List(values.to_vec()))
    }

    pub fn contains(property: &str, value: impl Into<FilterValue>) -> Self {
        Self::with_value(property, FilterOperator::Contains, value.into())
    }

    pub fn contains_token(property: &str, value: impl Into<FilterValue>) -> Self {
        Self::with_value(property, FilterOperator::ContainsToken, value.into())
    }

    pub fn not_has_property(property: &str) -> Self {
        Self {
            property: property.to_string(),
            operator: FilterOperator::NotHasProperty,
            value: None,
        }
    }

    /// `IN` 需要清單，`NOT_HAS_PROPERTY` 不帶值，其餘運算子需要單一值
    pub fn validate(&self) -> Result<(), ReportError> {
        let ok = match (&self.operator, &self.value) {
            (FilterOperator::NotHasProperty, None) => true,
            (FilterOperator::NotHasProperty, Some(_)) => false,
            (FilterOperator::In, Some(FilterValue::List(values))) => !values.is_empty(),
            (FilterOperator::In, _) => false,
            (_, Some(FilterValue::List(_))) | (_, None) => false,
            _ => true,
        };

        if self.property.trim().is_empty() {
            return Err(ReportError::InvalidConfigValueError {
                field: "filter.property".to_string(),
                value: self.property.clone(),
                reason: "Property name cannot be empty".to_string(),
            });
        }

        if ok {
            Ok(())
        } else {
            Err(ReportError::InvalidConfigValueError {
                field: format!("filter.{}", self.property),
                value: format!("{:?}", self.value),
                reason: format!("Value does not fit operator {}", self.operator.as_str()),
            })
        }
    }
}

/// Parses `property:OPERATOR[:value]`; `IN` values are comma separated.
impl FromStr for Filter {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let property = parts.next().unwrap_or_default().trim();
        let operator: FilterOperator = parts
            .next()
            .ok_or_else(|| ReportError::InvalidConfigValueError {
                field: "filter".to_string(),
                value: s.to_string(),
                reason: "Expected property:OPERATOR[:value]".to_string(),
            })?
            .trim()
            .parse()?;

        let value = parts.next().map(|raw| match operator {
            FilterOperator::In => {
                FilterValue::List(raw.split(',').map(|v| v.trim().to_string()).collect())
            }
            _ => FilterValue::parse_scalar(raw),
        });

        let filter = Filter {
            property: property.to_string(),
            operator,
            value,
        };
        filter.validate()?;
        Ok(filter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregationMode {
    Count,
    Sum(String),
}

/// 搜尋客戶端計算一個數值所需的全部資訊
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub object: CrmObject,
    pub date_property: String,
    pub time_range: TimeRange,
    pub filters: Vec<Filter>,
    pub mode: AggregationMode,
}

impl QuerySpec {
    /// 先放時間範圍，再放呼叫端的條件，組成一個 AND 群組
    pub fn filter_group(&self) -> FilterGroup {
        let mut filters = Vec::with_capacity(self.filters.len() + 2);
        filters.push(Filter::gte(&self.date_property, self.time_range.start));
        filters.push(Filter::lt(&self.date_property, self.time_range.end));
        filters.extend(self.filters.iter().cloned());
        FilterGroup { filters }
    }
}

/// How a breakdown value becomes a predicate on the property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    #[default]
    Enumeration,
    MultiSelect,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakdownProperty {
    pub name: String,
    pub kind: PropertyKind,
}

impl BreakdownProperty {
    pub fn filter_for(&self, value: &FilterValue) -> Filter {
        match self.kind {
            PropertyKind::Enumeration => Filter::eq(&self.name, value.clone()),
            PropertyKind::MultiSelect => Filter::contains_token(&self.name, value.clone()),
            PropertyKind::Text => Filter::contains(&self.name, value.clone()),
        }
    }
}

/// 指標表中單一標籤要查詢的內容
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSpec {
    /// 不加條件：整個維度的總數
    All,
    /// 之後手動填寫，不會查詢
    Skip,
    Value(FilterValue),
    /// 分類屬性沒有值的紀錄
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub label: String,
    pub filter: FilterSpec,
}

impl MetricSpec {
    pub fn new(label: &str, filter: FilterSpec) -> Self {
        Self {
            label: label.to_string(),
            filter,
        }
    }
}

/// 指標表所有標籤共用的查詢模板
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub object: CrmObject,
    pub date_property: String,
    pub base_filters: Vec<Filter>,
    pub property: Option<BreakdownProperty>,
    pub pipeline_property: String,
    pub pipelines: Vec<String>,
    pub mode: AggregationMode,
}

impl Dimension {
    pub fn new(object: CrmObject, mode: AggregationMode) -> Self {
        Self {
            object,
            date_property: object.default_date_property().to_string(),
            base_filters: Vec::new(),
            property: None,
            pipeline_property: "pipeline".to_string(),
            pipelines: Vec::new(),
            mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Count(u64),
    Sum(f64),
    /// 不自動計算
    Skipped,
    /// 查詢失敗，數值未知
    Failed,
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Count(n) => Some(*n as f64),
            MetricValue::Sum(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, MetricValue::Failed)
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Count(n) => write!(f, "{}", n),
            MetricValue::Sum(v) => write!(f, "{:.2}", v),
            MetricValue::Skipped => f.write_str("MANUAL"),
            MetricValue::Failed => Ok(()),
        }
    }
}

/// 一次彙總產生的有序 標籤 -> 數值 對應
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregationResult {
    entries: Vec<(String, MetricValue)>,
}

impl AggregationResult {
    pub fn from_entries(entries: Vec<(String, MetricValue)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, label: &str) -> Option<&MetricValue> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.entries.iter().map(|(l, v)| (l.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|(_, v)| v.is_failed()).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub label: String,
    /// 每月一個值，依月份排序
    pub values: Vec<MetricValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSection {
    pub title: String,
    pub rows: Vec<ReportRow>,
}

/// 依區段排列的指標列，每月一欄
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonthlyReport {
    pub months: Vec<String>,
    pub sections: Vec<ReportSection>,
}

impl MonthlyReport {
    /// The `(metric label, value)` rows of one month column, in report order.
    pub fn month(&self, label: &str) -> Option<Vec<(&str, &MetricValue)>> {
        let index = self.months.iter().position(|m| m == label)?;
        Some(
            self.sections
                .iter()
                .flat_map(|section| section.rows.iter())
                .filter_map(|row| row.values.get(index).map(|v| (row.label.as_str(), v)))
                .collect(),
        )
    }
}
