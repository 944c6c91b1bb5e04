// 化学品参考库 - 按 CAS 号补全名称、分子式、分子量
//
// 参考库为只读 SQLite 文件，表 chemicals 的第 1-4 列依次为
// 分子量、分子式、中文名称、名称

use super::models::{columns, FieldMap, FieldValue};
use super::repository::sqlite::decode_value;
use crate::error::StationResult;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{info, warn};

/// 参考库中查到的化学品信息
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub cas: String,
    pub molecular_weight: FieldValue,
    pub formula: FieldValue,
    pub chinese_name: FieldValue,
    pub name: FieldValue,
}

impl CatalogEntry {
    /// 转换为可合并进录入表的字段
    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert(columns::MOLECULAR_WEIGHT.to_string(), self.molecular_weight.clone());
        fields.insert(columns::FORMULA.to_string(), self.formula.clone());
        fields.insert(columns::CHINESE_NAME.to_string(), self.chinese_name.clone());
        fields.insert(columns::NAME.to_string(), self.name.clone());
        fields
    }
}

/// 化学品参考库
pub struct ChemicalCatalog {
    pool: Option<SqlitePool>,
}

impl ChemicalCatalog {
    /// 打开参考库；文件不存在时返回一个不可用的空目录
    pub async fn open(path: &Path) -> StationResult<Self> {
        if !path.exists() {
            warn!("化学品参考库不存在，CAS 自动补全不可用: {:?}", path);
            return Ok(Self::disabled());
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&format!("sqlite:{}?mode=ro", path.to_string_lossy()))
            .await?;

        info!("已打开化学品参考库: {:?}", path);
        Ok(Self { pool: Some(pool) })
    }

    /// 不可用的参考库（所有查询返回空）
    pub fn disabled() -> Self {
        Self { pool: None }
    }

    pub fn is_available(&self) -> bool {
        self.pool.is_some()
    }

    /// 按 CAS 号查询
    pub async fn lookup(&self, cas: &str) -> StationResult<Option<CatalogEntry>> {
        let Some(pool) = &self.pool else {
            return Ok(None);
        };

        let row = sqlx::query("SELECT * FROM chemicals WHERE cas = ?")
            .bind(cas)
            .fetch_optional(pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(CatalogEntry {
            cas: cas.to_string(),
            molecular_weight: decode_value(&row, 1)?,
            formula: decode_value(&row, 2)?,
            chinese_name: decode_value(&row, 3)?,
            name: decode_value(&row, 4)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn build_catalog(path: &Path) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&format!("sqlite:{}?mode=rwc", path.to_string_lossy()))
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE chemicals (cas TEXT, mw REAL, formula TEXT, cn_name TEXT, name TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO chemicals VALUES ('56-87-1', 146.19, 'C6H14N2O2', '赖氨酸', 'Lysine')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn test_lookup_by_cas() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chemicals.db");
        build_catalog(&path).await;

        let catalog = ChemicalCatalog::open(&path).await.unwrap();
        assert!(catalog.is_available());

        let entry = catalog.lookup("56-87-1").await.unwrap().expect("entry");
        assert_eq!(entry.molecular_weight, FieldValue::Real(146.19));
        assert_eq!(entry.name, FieldValue::text("Lysine"));
        let fields = entry.to_fields();
        assert_eq!(fields.get(columns::CHINESE_NAME), Some(&FieldValue::text("赖氨酸")));

        assert!(catalog.lookup("50-00-0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_catalog_is_disabled() {
        let dir = tempdir().unwrap();
        let catalog = ChemicalCatalog::open(&dir.path().join("missing.db")).await.unwrap();
        assert!(!catalog.is_available());
        assert!(catalog.lookup("56-87-1").await.unwrap().is_none());
    }
}
