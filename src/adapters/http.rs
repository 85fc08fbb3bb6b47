use crate::domain::model::{
    AggregationMode, CrmObject, Filter, FilterGroup, FilterOperator, FilterValue, MetricValue,
    QuerySpec,
};
use crate::domain::ports::SearchBackend;
use crate::utils::error::{Result, SearchError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.hubapi.com";

/// CRM 搜尋端點的連線設定
#[derive(Debug, Clone)]
pub struct SearchClientConfig {
    pub base_url: String,
    pub access_token: String,
    pub page_size: u32,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl SearchClientConfig {
    pub fn new(base_url: &str, access_token: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            page_size: 100,
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireFilter<'a> {
    property_name: &'a str,
    operator: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    values: Option<&'a [String]>,
}

impl<'a> From<&'a Filter> for WireFilter<'a> {
    fn from(filter: &'a Filter) -> Self {
        let (value, values) = match (&filter.operator, &filter.value) {
            (FilterOperator::In, Some(FilterValue::List(list))) => (None, Some(list.as_slice())),
            (_, Some(FilterValue::Bool(b))) => (Some(serde_json::Value::Bool(*b)), None),
            (_, Some(FilterValue::Integer(n))) => (Some(serde_json::Value::from(*n)), None),
            (_, Some(FilterValue::Number(n))) => (Some(serde_json::Value::from(*n)), None),
            (_, Some(FilterValue::Text(s))) => (Some(serde_json::Value::String(s.clone())), None),
            (_, Some(FilterValue::List(list))) => (None, Some(list.as_slice())),
            (_, None) => (None, None),
        };

        Self {
            property_name: &filter.property,
            operator: filter.operator.as_str(),
            value,
            values,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireFilterGroup<'a> {
    filters: Vec<WireFilter<'a>>,
}

impl<'a> From<&'a FilterGroup> for WireFilterGroup<'a> {
    fn from(group: &'a FilterGroup) -> Self {
        Self {
            filters: group.filters.iter().map(WireFilter::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    filter_groups: Vec<WireFilterGroup<'a>>,
    limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<Vec<&'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    results: Vec<SearchRecord>,
    paging: Option<Paging>,
}

impl SearchResponse {
    fn next_cursor(&self) -> Option<&str> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.as_ref())
            .map(|n| n.after.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct SearchRecord {
    #[serde(default)]
    properties: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct NextPage {
    after: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

/// HubSpot CRM v3 object search client.
pub struct HubSpotSearchClient {
    client: Client,
    config: SearchClientConfig,
}

impl HubSpotSearchClient {
    pub fn new(config: SearchClientConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn endpoint(&self, object: CrmObject) -> String {
        format!("{}/crm/v3/objects/{}/search", self.config.base_url, object)
    }

    async fn count(&self, query: &QuerySpec) -> std::result::Result<u64, SearchError> {
        let group = query.filter_group();
        let request = SearchRequest {
            filter_groups: vec![WireFilterGroup::from(&group)],
            limit: 1,
            properties: None,
            after: None,
        };

        let response = self.post_with_retry(query.object, &request).await?;
        Ok(response.total)
    }

    async fn sum(&self, query: &QuerySpec, property: &str) -> std::result::Result<f64, SearchError> {
        let group = query.filter_group();
        let mut total = 0.0;
        let mut after: Option<String> = None;
        let mut seen_cursors = HashSet::new();
        let mut pages = 0usize;

        loop {
            let request = SearchRequest {
                filter_groups: vec![WireFilterGroup::from(&group)],
                limit: self.config.page_size,
                properties: Some(vec![property]),
                after: after.clone(),
            };

            let response = self.post_with_retry(query.object, &request).await?;
            pages += 1;
            total += response
                .results
                .iter()
                .map(|record| numeric_property(record, property))
                .sum::<f64>();

            match response.next_cursor() {
                Some(cursor) => {
                    if !seen_cursors.insert(cursor.to_string()) {
                        return Err(SearchError::CursorLoop(cursor.to_string()));
                    }
                    after = Some(cursor.to_string());
                }
                None => break,
            }
        }

        tracing::debug!("Summed '{}' over {} page(s): {}", property, pages, total);
        Ok(total)
    }

    async fn post_with_retry(
        &self,
        object: CrmObject,
        request: &SearchRequest<'_>,
    ) -> std::result::Result<SearchResponse, SearchError> {
        let mut attempt = 0;
        loop {
            match self.post_once(object, request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && attempt < self.config.retry_attempts => {
                    let delay = self.config.retry_delay * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "🔄 Search on {} failed ({}), retry {}/{} in {:?}",
                        object,
                        e,
                        attempt,
                        self.config.retry_attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once(
        &self,
        object: CrmObject,
        request: &SearchRequest<'_>,
    ) -> std::result::Result<SearchResponse, SearchError> {
        let endpoint = self.endpoint(object);
        tracing::debug!("Making search request to: {}", endpoint);

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.config.access_token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!("Search response status: {}", status);

        if status.is_success() {
            let body = response.text().await?;
            return serde_json::from_str(&body).map_err(|e| SearchError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(body);

        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            let filters = serde_json::to_string(&request.filter_groups).unwrap_or_default();
            tracing::warn!(
                "❌ {} rejected search ({}): {}; filters: {}",
                endpoint,
                status,
                message,
                filters
            );
            return Err(SearchError::Rejected {
                status: status.as_u16(),
                message,
                filters,
            });
        }

        Err(SearchError::Server {
            status: status.as_u16(),
            message,
        })
    }
}

/// 讀取數值屬性；缺少、null、非數字或非有限值都視為 0
fn numeric_property(record: &SearchRecord, property: &str) -> f64 {
    let value = match record.properties.get(property) {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

#[async_trait]
impl SearchBackend for HubSpotSearchClient {
    async fn search(&self, query: &QuerySpec) -> std::result::Result<MetricValue, SearchError> {
        let result = match &query.mode {
            AggregationMode::Count => self.count(query).await.map(MetricValue::Count),
            AggregationMode::Sum(property) => self.sum(query, property).await.map(MetricValue::Sum),
        };

        if let Err(e) = &result {
            let filters = serde_json::to_string(&query.filter_group().filters).unwrap_or_default();
            tracing::debug!(
                "Search on {} failed: {}; filters: {}",
                self.endpoint(query.object),
                e,
                filters
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::TimeRange;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client_for(server: &MockServer) -> HubSpotSearchClient {
        let mut config = SearchClientConfig::new(&server.base_url(), "test-token");
        config.retry_attempts = 2;
        config.retry_delay = Duration::from_millis(1);
        HubSpotSearchClient::new(config).unwrap()
    }

    fn deals_query(mode: AggregationMode) -> QuerySpec {
        QuerySpec {
            object: CrmObject::Deals,
            date_property: "closedate".to_string(),
            time_range: TimeRange::new(1_000, 2_000),
            filters: vec![Filter::eq("hs_is_closed_won", true)],
            mode,
        }
    }

    fn time_filters() -> serde_json::Value {
        json!([
            {"propertyName": "closedate", "operator": "GTE", "value": 1000},
            {"propertyName": "closedate", "operator": "LT", "value": 2000},
            {"propertyName": "hs_is_closed_won", "operator": "EQ", "value": true}
        ])
    }

    #[tokio::test]
    async fn test_count_uses_limit_one_and_returns_total() {
        let server = MockServer::start();
        let expected_body = json!({
            "filterGroups": [{"filters": time_filters()}],
            "limit": 1
        });

        let search_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/crm/v3/objects/deals/search")
                .header("authorization", "Bearer test-token")
                .json_body(expected_body);
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({"total": 7, "results": [{"id": "1", "properties": {}}]}));
        });

        let client = client_for(&server);
        let value = client.search(&deals_query(AggregationMode::Count)).await.unwrap();

        search_mock.assert();
        assert_eq!(value, MetricValue::Count(7));
    }

    #[tokio::test]
    async fn test_sum_follows_cursor_until_exhausted() {
        let server = MockServer::start();
        let first_page_body = json!({
            "filterGroups": [{"filters": time_filters()}],
            "limit": 100,
            "properties": ["amount"]
        });

        let first_page = server.mock(|when, then| {
            when.method(POST)
                .path("/crm/v3/objects/deals/search")
                .json_body(first_page_body);
            then.status(200).json_body(json!({
                "total": 5,
                "results": [
                    {"id": "1", "properties": {"amount": "100"}},
                    {"id": "2", "properties": {"amount": "50.5"}},
                    {"id": "3", "properties": {"amount": null}}
                ],
                "paging": {"next": {"after": "cursor-2"}}
            }));
        });

        let second_page = server.mock(|when, then| {
            when.method(POST)
                .path("/crm/v3/objects/deals/search")
                .json_body_partial(r#"{"after": "cursor-2"}"#);
            then.status(200).json_body(json!({
                "total": 5,
                "results": [
                    {"id": "4", "properties": {"amount": "49.5"}},
                    {"id": "5", "properties": {"amount": "not a number"}}
                ]
            }));
        });

        let client = client_for(&server);
        let value = client
            .search(&deals_query(AggregationMode::Sum("amount".to_string())))
            .await
            .unwrap();

        first_page.assert_hits(1);
        second_page.assert_hits(1);
        assert_eq!(value, MetricValue::Sum(200.0));
    }

    #[tokio::test]
    async fn test_sum_over_no_records_is_zero() {
        let server = MockServer::start();
        let search_mock = server.mock(|when, then| {
            when.method(POST).path("/crm/v3/objects/deals/search");
            then.status(200).json_body(json!({"total": 0, "results": []}));
        });

        let client = client_for(&server);
        let value = client
            .search(&deals_query(AggregationMode::Sum("amount".to_string())))
            .await
            .unwrap();

        search_mock.assert_hits(1);
        assert_eq!(value, MetricValue::Sum(0.0));
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_reported() {
        let server = MockServer::start();
        let search_mock = server.mock(|when, then| {
            when.method(POST).path("/crm/v3/objects/deals/search");
            then.status(500).body("internal error");
        });

        let client = client_for(&server);
        let err = client
            .search(&deals_query(AggregationMode::Count))
            .await
            .unwrap_err();

        // 第一次加上兩次重試
        search_mock.assert_hits(3);
        assert!(matches!(err, SearchError::Server { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_validation_error_surfaces_filters_without_retry() {
        let server = MockServer::start();
        let search_mock = server.mock(|when, then| {
            when.method(POST).path("/crm/v3/objects/deals/search");
            then.status(400).json_body(json!({
                "status": "error",
                "message": "Property 'hs_is_closed_won' is not valid"
            }));
        });

        let client = client_for(&server);
        let err = client
            .search(&deals_query(AggregationMode::Count))
            .await
            .unwrap_err();

        search_mock.assert_hits(1);
        match err {
            SearchError::Rejected {
                status,
                message,
                filters,
            } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Property 'hs_is_closed_won' is not valid");
                assert!(filters.contains("hs_is_closed_won"));
                assert!(filters.contains("GTE"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_repeated_cursor_is_a_failure() {
        let server = MockServer::start();
        let search_mock = server.mock(|when, then| {
            when.method(POST).path("/crm/v3/objects/deals/search");
            then.status(200).json_body(json!({
                "total": 1,
                "results": [{"id": "1", "properties": {"amount": "1"}}],
                "paging": {"next": {"after": "same"}}
            }));
        });

        let client = client_for(&server);
        let err = client
            .search(&deals_query(AggregationMode::Sum("amount".to_string())))
            .await
            .unwrap_err();

        search_mock.assert_hits(2);
        assert!(matches!(err, SearchError::CursorLoop(cursor) if cursor == "same"));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_transport_failure() {
        let mut config = SearchClientConfig::new("http://127.0.0.1:9", "test-token");
        config.retry_attempts = 1;
        config.retry_delay = Duration::from_millis(1);
        config.timeout = Duration::from_secs(2);
        let client = HubSpotSearchClient::new(config).unwrap();

        let err = client.search(&deals_query(AggregationMode::Count)).await.unwrap_err();

        assert!(matches!(err, SearchError::Transport(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_in_filter_serializes_values_list() {
        let pipelines = vec!["default".to_string(), "98765".to_string()];
        let filter = Filter::is_in("pipeline", &pipelines);
        let wire = serde_json::to_value(WireFilter::from(&filter)).unwrap();

        assert_eq!(
            wire,
            json!({"propertyName": "pipeline", "operator": "IN", "values": ["default", "98765"]})
        );

        let missing = Filter::not_has_property("country");
        let wire = serde_json::to_value(WireFilter::from(&missing)).unwrap();
        assert_eq!(
            wire,
            json!({"propertyName": "country", "operator": "NOT_HAS_PROPERTY"})
        );
    }

    #[test]
    fn test_numeric_property_tolerates_garbage() {
        let record: SearchRecord = serde_json::from_value(json!({
            "properties": {"a": "12.5", "b": 3, "c": "abc", "d": null, "e": "NaN"}
        }))
        .unwrap();

        assert_eq!(numeric_property(&record, "a"), 12.5);
        assert_eq!(numeric_property(&record, "b"), 3.0);
        assert_eq!(numeric_property(&record, "c"), 0.0);
        assert_eq!(numeric_property(&record, "d"), 0.0);
        assert_eq!(numeric_property(&record, "e"), 0.0);
        assert_eq!(numeric_property(&record, "missing"), 0.0);
    }
}
