// 试剂管理工作站 - 主库
//
// 摄像头画面经 OCR 录入化学品容器，扫码 + 称重记录每次使用，
// 所有记录写入本地 SQLite

// 声明模块
pub mod actors;
pub mod app;
pub mod commands;
pub mod domains;
pub mod error;
pub mod event_bus;
pub mod extraction;
pub mod logger;
pub mod models;
pub mod ocr;
pub mod peripherals;
pub mod settings;
pub mod storage;
pub mod utils;
pub mod workflow;

pub use app::{run, LaunchOptions};
pub use error::{ServiceError, StationError, StationResult};
