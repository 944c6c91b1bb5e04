// 领域模块 - 用于组织工作站的业务依赖
//
// 控制器需要的组件按领域分组，而不是散落在一个大的上下文结构里
// 包含2个领域：存储、外设

pub mod peripherals;
pub mod storage;

pub use peripherals::PeripheralDomain;
pub use storage::StorageDomain;
