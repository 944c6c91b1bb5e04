// 工作流模块 - 录入与使用两条流程
//
// state 定义纯状态机，controller 执行状态机产生的副作用

pub mod controller;
pub mod scan;
pub mod session;
pub mod state;

pub use controller::{Flow, StationController};
pub use scan::{resolve_scan, ResolvedFrom, ResolvedItem, ScanIdentifier};
pub use session::{CapturedFrame, Reading, SavedEntry, StationSession};
pub use state::{transition, Effect, NoticeLevel, Transition, WorkflowEvent, WorkflowState};
