// 存储模块 - 记录库、化学品参考库与数据导出

// 子模块
pub mod catalog;
pub mod export;
pub mod models;
pub mod repository;

// 重新导出主要类型
pub use catalog::{CatalogEntry, ChemicalCatalog};
pub use export::{export_csv, ExportKind};
pub use models::*;
pub use repository::RecordRepository;

// 重新导出具体实现
pub use repository::sqlite::SqliteRecordStore;
