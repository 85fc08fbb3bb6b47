use crate::domain::model::{MetricValue, QuerySpec};
use crate::utils::error::{Result, SearchError};
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    /// Where `path` ends up, for reporting back to the user.
    fn location(&self, path: &str) -> String;
}

/// Resolves one query to a scalar. `Ok` is always `Count` or `Sum`.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &QuerySpec) -> std::result::Result<MetricValue, SearchError>;
}
