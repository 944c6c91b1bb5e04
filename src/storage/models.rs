// 数据模型定义 - 数据库实体结构

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 数据库中时间字段的格式（秒级精度，本地时间）
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 获取当前本地时间字符串，用于录入时间和更新时间
pub fn local_now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// 持久化列名
///
/// 沿用工作站既有数据库的列名，旧的数据库文件可以直接打开
pub mod columns {
    pub const WAREHOUSE_ID: &str = "仓库_id";
    pub const ENTERED_AT: &str = "录入时间";
    pub const PRODUCT_ID: &str = "产品_id";
    pub const NAME: &str = "名称";
    pub const CHINESE_NAME: &str = "中文名称";
    pub const CAS: &str = "cas";
    pub const LOT: &str = "lot";
    pub const NET_CONTENT: &str = "净含量";
    pub const FORMULA: &str = "分子式";
    pub const MOLECULAR_WEIGHT: &str = "分子量";
    pub const PURITY: &str = "纯度";
    pub const POSITION: &str = "位置";
    pub const UNIT: &str = "单位";

    pub const LOG_ID: &str = "记录_id";
    pub const UPDATED_AT: &str = "更新时间";
    pub const USAGE: &str = "使用量";
}

/// 表名
pub const RECORDS_TABLE: &str = "records";
pub const CHANGE_LOGS_TABLE: &str = "change_logs";

/// 单元格取值 - SQLite 动态类型的直接映射
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// 尝试按数值读取（文本会被解析）
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Real(v) => Some(*v),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
            FieldValue::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Real(v) if v.fract() == 0.0 => Some(*v as i64),
            FieldValue::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Real(v) => write!(f, "{}", v),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Real(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

/// 字段名到取值的有序映射
pub type FieldMap = BTreeMap<String, FieldValue>;

/// 化学品容器的首次录入记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChemicalRecord {
    pub product_id: i64,
    pub warehouse_id: Option<i64>,
    pub entered_at: Option<String>,
    /// 净含量（读取最新状态时已被最新使用记录覆盖）
    pub net_content: Option<f64>,
    /// 其余列：名称、cas、lot 以及动态新增的列
    pub attributes: FieldMap,
}

impl ChemicalRecord {
    pub fn attribute(&self, key: &str) -> Option<&FieldValue> {
        self.attributes.get(key).filter(|v| !v.is_null())
    }

    pub fn position(&self) -> Option<String> {
        self.attribute(columns::POSITION).map(|v| v.to_string())
    }
}

/// 使用记录（只追加）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub log_id: i64,
    pub product_id: i64,
    pub updated_at: Option<String>,
    pub net_content: Option<f64>,
    /// 使用时显示的记录快照及其他动态列
    pub attributes: FieldMap,
}

/// 导出用：记录及其最新状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestRecord {
    pub record: ChemicalRecord,
    /// 最新使用时间；从未使用时为录入时间
    pub last_updated_at: Option<String>,
}
