// 轉接層：領域介面的具體實作（HTTP 上的 CRM 搜尋、本地檔案）

pub mod http;
pub mod storage;

pub use http::{HubSpotSearchClient, SearchClientConfig};
pub use storage::LocalStorage;
