// 扫码解析 - 二维码内容 "仓库_id:产品_id" 与记录定位

use crate::error::{StationError, StationResult};
use crate::storage::{columns, FieldMap, FieldValue, RecordRepository};
use std::fmt;

/// 二维码标识：仓库编号 + 产品编号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanIdentifier {
    pub warehouse_id: i64,
    pub product_id: i64,
}

impl ScanIdentifier {
    /// 解析 `"w:p"`，允许 `;` 之后带附加内容
    pub fn parse(token: &str) -> StationResult<Self> {
        let body = token.split(';').next().unwrap_or_default().trim();
        let (warehouse, product) = body
            .split_once(':')
            .ok_or_else(|| StationError::validation(format!("二维码格式错误: {}", token)))?;

        let warehouse_id = warehouse
            .trim()
            .parse::<i64>()
            .map_err(|_| StationError::validation(format!("二维码中的仓库编号无效: {}", token)))?;
        let product_id = product
            .trim()
            .parse::<i64>()
            .map_err(|_| StationError::validation(format!("二维码中的产品编号无效: {}", token)))?;

        Ok(Self {
            warehouse_id,
            product_id,
        })
    }
}

impl fmt::Display for ScanIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.warehouse_id, self.product_id)
    }
}

/// 扫码定位到的数据来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
    /// 最新一条使用记录
    ChangeLog,
    /// 首次录入记录（从未使用过）
    Record,
}

/// 使用模式下显示并据此计算剩余量的容器状态
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedItem {
    pub scan: ScanIdentifier,
    /// 扣除前的净含量
    pub baseline: f64,
    /// 显示用字段
    pub fields: FieldMap,
    pub source: ResolvedFrom,
}

/// 使用记录中由存储层维护、不随快照复制的列
const MANAGED_COLUMNS: [&str; 5] = [
    columns::PRODUCT_ID,
    columns::ENTERED_AT,
    columns::LOG_ID,
    columns::UPDATED_AT,
    columns::USAGE,
];

impl ResolvedItem {
    pub fn product_id(&self) -> i64 {
        self.scan.product_id
    }

    /// 生成一条使用记录：显示快照 + 本次使用量 + 剩余净含量
    pub fn usage_fields(&self, usage: f64, remaining: f64) -> FieldMap {
        let mut fields: FieldMap = self
            .fields
            .iter()
            .filter(|(key, _)| !MANAGED_COLUMNS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        fields.insert(columns::USAGE.to_string(), FieldValue::Real(usage));
        fields.insert(columns::NET_CONTENT.to_string(), FieldValue::Real(remaining));
        fields
    }

    /// 日志中的简要描述
    pub fn summary(&self) -> String {
        let name = self
            .fields
            .get(columns::CHINESE_NAME)
            .or_else(|| self.fields.get(columns::NAME))
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
            .unwrap_or_else(|| "未命名".to_string());
        format!(
            "产品 {} ({})，当前净含量 {}",
            self.scan, name, self.baseline
        )
    }
}

/// 定位扫码对应的容器
///
/// 优先取该产品最新的使用记录，从未使用过时退回首次录入记录
pub async fn resolve_scan(repo: &dyn RecordRepository, scan: ScanIdentifier) -> StationResult<ResolvedItem> {
    if let Some(log) = repo.latest_change_log(scan.product_id, scan.warehouse_id).await? {
        if let Some(baseline) = log.net_content {
            let mut fields = log.attributes;
            fields.insert(columns::NET_CONTENT.to_string(), FieldValue::Real(baseline));
            return Ok(ResolvedItem {
                scan,
                baseline,
                fields,
                source: ResolvedFrom::ChangeLog,
            });
        }
    }

    let record = repo
        .record_with_latest_state(scan.product_id, scan.warehouse_id)
        .await?
        .ok_or_else(|| StationError::NotFound(format!("未找到二维码 {} 对应的记录", scan)))?;

    let baseline = record
        .net_content
        .ok_or_else(|| StationError::validation(format!("记录 {} 缺少净含量，无法计算使用量", scan)))?;

    let mut fields = record.attributes;
    fields.insert(columns::WAREHOUSE_ID.to_string(), FieldValue::Integer(scan.warehouse_id));
    fields.insert(columns::NET_CONTENT.to_string(), FieldValue::Real(baseline));

    Ok(ResolvedItem {
        scan,
        baseline,
        fields,
        source: ResolvedFrom::Record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteRecordStore;
    use tempfile::tempdir;

    #[test]
    fn test_parse_scan_identifier() {
        let scan = ScanIdentifier::parse("1:12").unwrap();
        assert_eq!(scan, ScanIdentifier { warehouse_id: 1, product_id: 12 });
        assert_eq!(scan.to_string(), "1:12");

        let scan = ScanIdentifier::parse(" 2:5;A-03 ").unwrap();
        assert_eq!(scan.product_id, 5);

        assert!(matches!(ScanIdentifier::parse("12"), Err(StationError::Validation(_))));
        assert!(ScanIdentifier::parse("a:1").is_err());
        assert!(ScanIdentifier::parse("1:").is_err());
        assert!(ScanIdentifier::parse("").is_err());
    }

    #[test]
    fn test_usage_fields_drop_managed_columns() {
        let mut fields = FieldMap::new();
        fields.insert(columns::NAME.to_string(), FieldValue::text("Lysine"));
        fields.insert(columns::ENTERED_AT.to_string(), FieldValue::text("2024-01-01 00:00:00"));
        fields.insert(columns::USAGE.to_string(), FieldValue::Real(1.0));
        fields.insert(columns::NET_CONTENT.to_string(), FieldValue::Real(100.0));
        let item = ResolvedItem {
            scan: ScanIdentifier { warehouse_id: 1, product_id: 3 },
            baseline: 100.0,
            fields,
            source: ResolvedFrom::Record,
        };

        let usage = item.usage_fields(20.5, 79.5);
        assert_eq!(usage.get(columns::NAME), Some(&FieldValue::text("Lysine")));
        assert_eq!(usage.get(columns::USAGE), Some(&FieldValue::Real(20.5)));
        assert_eq!(usage.get(columns::NET_CONTENT), Some(&FieldValue::Real(79.5)));
        assert!(usage.get(columns::ENTERED_AT).is_none());
    }

    #[tokio::test]
    async fn test_resolve_prefers_latest_change_log() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::new(&dir.path().join("r.db").to_string_lossy())
            .await
            .unwrap();

        let mut fields = FieldMap::new();
        fields.insert(columns::NAME.to_string(), FieldValue::text("Lysine"));
        fields.insert(columns::NET_CONTENT.to_string(), FieldValue::Real(100.0));
        let product_id = store.create_record(&fields, 1).await.unwrap();
        let scan = ScanIdentifier { warehouse_id: 1, product_id };

        let item = resolve_scan(&store, scan).await.unwrap();
        assert_eq!(item.source, ResolvedFrom::Record);
        assert_eq!(item.baseline, 100.0);

        store
            .append_change_log(&item.usage_fields(20.0, 80.0), product_id)
            .await
            .unwrap();

        let item = resolve_scan(&store, scan).await.unwrap();
        assert_eq!(item.source, ResolvedFrom::ChangeLog);
        assert_eq!(item.baseline, 80.0);
        assert_eq!(item.fields.get(columns::NAME), Some(&FieldValue::text("Lysine")));

        // 其他仓库的同一编号不匹配
        let other = ScanIdentifier { warehouse_id: 2, product_id };
        assert!(matches!(resolve_scan(&store, other).await, Err(StationError::NotFound(_))));
    }
}
