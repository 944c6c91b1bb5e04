// Repository 抽象层 - 定义记录库操作接口

pub mod sqlite;

use super::models::*;
use crate::error::StationResult;
use async_trait::async_trait;

/// 记录库操作接口 - 工作流控制器只依赖此 trait
#[async_trait]
pub trait RecordRepository: Send + Sync {
    // ========== 首次录入 ==========

    /// 新增一条录入记录，返回分配的产品ID
    ///
    /// 自动写入录入时间和仓库ID；未知字段会先新增为 TEXT 列
    async fn create_record(&self, fields: &FieldMap, warehouse_id: i64) -> StationResult<i64>;

    /// 获取当前最大的产品ID
    async fn max_product_id(&self) -> StationResult<Option<i64>>;

    /// 获取记录，净含量已被最新使用记录覆盖
    async fn record_with_latest_state(
        &self,
        product_id: i64,
        warehouse_id: i64,
    ) -> StationResult<Option<ChemicalRecord>>;

    // ========== 使用记录 ==========

    /// 追加一条使用记录，返回记录ID
    async fn append_change_log(&self, fields: &FieldMap, product_id: i64) -> StationResult<i64>;

    /// 获取产品最近一次的使用记录（按更新时间倒序，相同时间取记录ID最大者）
    async fn latest_change_log(
        &self,
        product_id: i64,
        warehouse_id: i64,
    ) -> StationResult<Option<ChangeLogEntry>>;

    // ========== 表结构 ==========

    /// 确保列存在，返回本次实际新增的列
    async fn ensure_columns(&self, table: &str, names: &[String]) -> StationResult<Vec<String>>;

    /// 获取表的列名
    async fn columns(&self, table: &str) -> StationResult<Vec<String>>;

    /// 获取表结构版本号（每新增一列加一）
    async fn schema_version(&self) -> StationResult<i64>;

    // ========== 导出 ==========

    /// 所有首次录入记录
    async fn all_records(&self) -> StationResult<Vec<ChemicalRecord>>;

    /// 所有使用记录
    async fn all_change_logs(&self) -> StationResult<Vec<ChangeLogEntry>>;

    /// 每个产品的最新状态
    async fn latest_records(&self) -> StationResult<Vec<LatestRecord>>;
}
