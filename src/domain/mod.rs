// 領域層：報表模型與介面，不直接存取網路或檔案系統

pub mod model;
pub mod ports;
