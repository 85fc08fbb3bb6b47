use crate::domain::model::{
    AggregationResult, Dimension, Filter, FilterSpec, MetricSpec, MetricValue, QuerySpec,
    TimeRange,
};
use crate::domain::ports::SearchBackend;
use crate::utils::error::{ReportError, Result};

/// 透過搜尋後端逐一計算指標表（標籤 -> 篩選規格）
pub struct MetricAggregator<'a, B: SearchBackend> {
    backend: &'a B,
}

impl<'a, B: SearchBackend> MetricAggregator<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    pub async fn aggregate(
        &self,
        range: &TimeRange,
        dimension: &Dimension,
        metrics: &[MetricSpec],
    ) -> AggregationResult {
        let mut entries = Vec::with_capacity(metrics.len());

        for metric in metrics {
            let value = match plan_query(range, dimension, &metric.filter) {
                Ok(None) => {
                    tracing::debug!("⏭️ {}: filled in manually", metric.label);
                    MetricValue::Skipped
                }
                Ok(Some(query)) => match self.backend.search(&query).await {
                    Ok(value) => {
                        tracing::debug!("{} = {}", metric.label, value);
                        value
                    }
                    Err(e) => {
                        tracing::warn!("❌ {}: query failed, leaving it empty: {}", metric.label, e);
                        MetricValue::Failed
                    }
                },
                Err(e) => {
                    tracing::error!("❌ {}: cannot build query: {}", metric.label, e);
                    MetricValue::Failed
                }
            };
            entries.push((metric.label.clone(), value));
        }

        AggregationResult::from_entries(entries)
    }

    /// Same as [`aggregate`](Self::aggregate), restricted to deals in the given pipelines.
    pub async fn aggregate_in_pipelines(
        &self,
        range: &TimeRange,
        dimension: &Dimension,
        metrics: &[MetricSpec],
        pipelines: &[String],
    ) -> AggregationResult {
        let mut scoped = dimension.clone();
        scoped.pipelines = pipelines.to_vec();
        self.aggregate(range, &scoped, metrics).await
    }
}

/// 建立單一標籤的查詢；略過的標籤回傳 `None`
pub fn plan_query(
    range: &TimeRange,
    dimension: &Dimension,
    spec: &FilterSpec,
) -> Result<Option<QuerySpec>> {
    let breakdown = match spec {
        FilterSpec::Skip => return Ok(None),
        FilterSpec::All => None,
        FilterSpec::Value(value) => Some(dimension_property(dimension)?.filter_for(value)),
        FilterSpec::Missing => Some(Filter::not_has_property(&dimension_property(dimension)?.name)),
    };

    let mut filters = dimension.base_filters.clone();
    if !dimension.pipelines.is_empty() {
        filters.push(Filter::is_in(&dimension.pipeline_property, &dimension.pipelines));
    }
    filters.extend(breakdown);

    Ok(Some(QuerySpec {
        object: dimension.object,
        date_property: dimension.date_property.clone(),
        time_range: *range,
        filters,
        mode: dimension.mode.clone(),
    }))
}

fn dimension_property(dimension: &Dimension) -> Result<&crate::domain::model::BreakdownProperty> {
    dimension
        .property
        .as_ref()
        .ok_or_else(|| ReportError::ConfigError {
            message: "a breakdown value needs a breakdown property".to_string(),
        })
}
