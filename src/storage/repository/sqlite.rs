// SQLite 记录库实现

use super::RecordRepository;
use crate::error::{StationError, StationResult};
use crate::storage::models::*;
use crate::utils::{quote_identifier, validate_column_name};
use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::{debug, info};

/// 最新净含量、最新更新时间的临时别名
const LATEST_NET_CONTENT: &str = "__latest_net_content";
const LATEST_UPDATED_AT: &str = "__latest_updated_at";

/// SQLite 记录库
///
/// 连接池只保留一个连接：所有读写按调用顺序串行执行
pub struct SqliteRecordStore {
    pool: SqlitePool,
    required_fields: Vec<String>,
}

impl SqliteRecordStore {
    /// 打开（或创建）数据库文件并初始化表结构
    pub async fn new(db_path: &str) -> StationResult<Self> {
        info!("初始化 SQLite 记录库: {}", db_path);

        // 确保数据库文件的目录存在
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StationError::Storage(sqlx::Error::Io(e))
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await?;

        let store = Self {
            pool,
            required_fields: Vec::new(),
        };
        store.initialize_tables().await?;

        Ok(store)
    }

    /// 设置录入时的必填字段
    pub fn with_required_fields(mut self, fields: Vec<String>) -> Self {
        self.required_fields = fields;
        self
    }

    /// 获取连接池引用
    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn initialize_tables(&self) -> StationResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                "仓库_id" INTEGER,
                "录入时间" TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                "产品_id" INTEGER PRIMARY KEY AUTOINCREMENT,
                "名称" TEXT,
                "cas" TEXT,
                "lot" TEXT,
                "净含量" REAL,
                UNIQUE("产品_id", "仓库_id", "录入时间")
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS change_logs (
                "记录_id" INTEGER PRIMARY KEY AUTOINCREMENT,
                "产品_id" INTEGER,
                "更新时间" TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                "净含量" REAL,
                FOREIGN KEY ("产品_id") REFERENCES records("产品_id")
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_change_logs_product_time ON change_logs("产品_id", "更新时间")"#,
        )
        .execute(&self.pool)
        .await?;

        info!("记录库表初始化完成");
        Ok(())
    }

    fn check_table(table: &str) -> StationResult<()> {
        if table == RECORDS_TABLE || table == CHANGE_LOGS_TABLE {
            Ok(())
        } else {
            Err(StationError::validation(format!("未知的表: {}", table)))
        }
    }

    /// 按字段映射插入一行，返回 rowid
    async fn insert_row(&self, table: &str, row: &FieldMap) -> StationResult<i64> {
        let names: Vec<String> = row.keys().cloned().collect();
        self.ensure_columns(table, &names).await?;

        let column_list = names
            .iter()
            .map(|name| quote_identifier(name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table, column_list, placeholders
        );

        let mut query = sqlx::query(&sql);
        for value in row.values() {
            query = bind_value(query, value);
        }
        let result = query.execute(&self.pool).await?;

        Ok(result.last_insert_rowid())
    }

    async fn fetch_records(&self, filter: Option<(i64, i64)>) -> StationResult<Vec<LatestRecord>> {
        let mut sql = format!(
            r#"
            SELECT r.*, cl."净含量" AS {net}, cl."更新时间" AS {updated}
            FROM records r
            LEFT JOIN change_logs cl ON cl."记录_id" = (
                SELECT c2."记录_id" FROM change_logs c2
                WHERE c2."产品_id" = r."产品_id"
                ORDER BY c2."更新时间" DESC, c2."记录_id" DESC
                LIMIT 1
            )
            "#,
            net = LATEST_NET_CONTENT,
            updated = LATEST_UPDATED_AT,
        );
        if filter.is_some() {
            sql.push_str(r#" WHERE r."产品_id" = ? AND r."仓库_id" = ?"#);
        }
        sql.push_str(r#" ORDER BY r."产品_id""#);

        let mut query = sqlx::query(&sql);
        if let Some((product_id, warehouse_id)) = filter {
            query = query.bind(product_id).bind(warehouse_id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut fields = decode_row(&row)?;
            let latest_net = fields.remove(LATEST_NET_CONTENT).and_then(|v| v.as_f64());
            let latest_time = fields
                .remove(LATEST_UPDATED_AT)
                .filter(|v| !v.is_null())
                .map(|v| v.to_string());

            let mut record = record_from_fields(fields)?;
            // 用最新使用记录的净含量覆盖原始值
            if let Some(net) = latest_net {
                record.net_content = Some(net);
            }
            let last_updated_at = latest_time.or_else(|| record.entered_at.clone());
            records.push(LatestRecord {
                record,
                last_updated_at,
            });
        }

        Ok(records)
    }
}

#[async_trait]
impl RecordRepository for SqliteRecordStore {
    async fn create_record(&self, fields: &FieldMap, warehouse_id: i64) -> StationResult<i64> {
        let missing: Vec<&String> = self
            .required_fields
            .iter()
            .filter(|name| fields.get(name.as_str()).map_or(true, FieldValue::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(StationError::validation(format!("缺少必填字段: {:?}", missing)));
        }

        let mut row = fields.clone();
        row.remove(columns::PRODUCT_ID);
        coerce_net_content(&mut row)?;
        row.insert(columns::ENTERED_AT.to_string(), FieldValue::Text(local_now()));
        row.insert(
            columns::WAREHOUSE_ID.to_string(),
            FieldValue::Integer(warehouse_id),
        );

        let product_id = self.insert_row(RECORDS_TABLE, &row).await?;
        info!("新增录入记录: 仓库={}, 产品={}", warehouse_id, product_id);
        Ok(product_id)
    }

    async fn max_product_id(&self) -> StationResult<Option<i64>> {
        let max: Option<i64> = sqlx::query_scalar(r#"SELECT MAX("产品_id") FROM records"#)
            .fetch_one(&self.pool)
            .await?;
        Ok(max)
    }

    async fn record_with_latest_state(
        &self,
        product_id: i64,
        warehouse_id: i64,
    ) -> StationResult<Option<ChemicalRecord>> {
        let mut records = self
            .fetch_records(Some((product_id, warehouse_id)))
            .await?;
        Ok(records.pop().map(|latest| latest.record))
    }

    async fn append_change_log(&self, fields: &FieldMap, product_id: i64) -> StationResult<i64> {
        let mut row = fields.clone();
        row.remove(columns::LOG_ID);
        coerce_net_content(&mut row)?;
        row.insert(
            columns::PRODUCT_ID.to_string(),
            FieldValue::Integer(product_id),
        );
        row.insert(columns::UPDATED_AT.to_string(), FieldValue::Text(local_now()));

        let log_id = self.insert_row(CHANGE_LOGS_TABLE, &row).await?;
        info!("新增使用记录: 产品={}, 记录={}", product_id, log_id);
        Ok(log_id)
    }

    async fn latest_change_log(
        &self,
        product_id: i64,
        warehouse_id: i64,
    ) -> StationResult<Option<ChangeLogEntry>> {
        let row = sqlx::query(
            r#"
            SELECT cl.*
            FROM change_logs cl
            JOIN records r ON cl."产品_id" = r."产品_id"
            WHERE cl."产品_id" = ? AND r."仓库_id" = ?
            ORDER BY cl."更新时间" DESC, cl."记录_id" DESC
            LIMIT 1
            "#,
        )
        .bind(product_id)
        .bind(warehouse_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut entry = change_log_from_fields(decode_row(&row)?)?;
                entry.attributes.remove(columns::USAGE);
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn ensure_columns(&self, table: &str, names: &[String]) -> StationResult<Vec<String>> {
        Self::check_table(table)?;
        for name in names {
            validate_column_name(name).map_err(StationError::Validation)?;
        }

        let mut existing = self.columns(table).await?;
        let mut added = Vec::new();

        for name in names {
            // SQLite 列名对 ASCII 大小写不敏感
            if existing.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                continue;
            }

            let alter = format!(
                "ALTER TABLE {} ADD COLUMN {} TEXT",
                table,
                quote_identifier(name)
            );
            sqlx::query(&alter).execute(&self.pool).await?;

            let version = self.schema_version().await? + 1;
            sqlx::query(&format!("PRAGMA user_version = {}", version))
                .execute(&self.pool)
                .await?;

            info!("表 {} 新增列 {}，结构版本 {}", table, name, version);
            existing.push(name.clone());
            added.push(name.clone());
        }

        Ok(added)
    }

    async fn columns(&self, table: &str) -> StationResult<Vec<String>> {
        Self::check_table(table)?;
        let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_identifier(table)))
            .fetch_all(&self.pool)
            .await?;

        let mut names = Vec::with_capacity(rows.len());
        for row in rows {
            names.push(row.try_get::<String, _>("name")?);
        }
        Ok(names)
    }

    async fn schema_version(&self) -> StationResult<i64> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    async fn all_records(&self) -> StationResult<Vec<ChemicalRecord>> {
        let rows = sqlx::query(r#"SELECT * FROM records ORDER BY "产品_id""#)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| decode_row(row).and_then(record_from_fields))
            .collect()
    }

    async fn all_change_logs(&self) -> StationResult<Vec<ChangeLogEntry>> {
        let rows = sqlx::query(r#"SELECT * FROM change_logs ORDER BY "记录_id""#)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| decode_row(row).and_then(change_log_from_fields))
            .collect()
    }

    async fn latest_records(&self) -> StationResult<Vec<LatestRecord>> {
        self.fetch_records(None).await
    }
}

/// 把净含量统一转成浮点数，避免字符串往返带来的精度问题
fn coerce_net_content(row: &mut FieldMap) -> StationResult<()> {
    if let Some(value) = row.get_mut(columns::NET_CONTENT) {
        match value {
            FieldValue::Null | FieldValue::Real(_) => {}
            FieldValue::Integer(v) => *value = FieldValue::Real(*v as f64),
            FieldValue::Text(text) => {
                if text.trim().is_empty() {
                    *value = FieldValue::Null;
                } else {
                    let parsed = text.trim().parse::<f64>().map_err(|_| {
                        StationError::validation(format!("净含量不是数字: {}", text))
                    })?;
                    *value = FieldValue::Real(parsed);
                }
            }
        }
    }
    Ok(())
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &FieldValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        FieldValue::Null => query.bind(None::<String>),
        FieldValue::Integer(v) => query.bind(*v),
        FieldValue::Real(v) => query.bind(*v),
        FieldValue::Text(s) => query.bind(s.clone()),
    }
}

/// 按实际存储类型解码一行（动态列可能混存整数、浮点和文本）
fn decode_row(row: &SqliteRow) -> StationResult<FieldMap> {
    let mut fields = FieldMap::new();
    for column in row.columns() {
        let value = decode_value(row, column.ordinal())?;
        fields.insert(column.name().to_string(), value);
    }
    Ok(fields)
}

/// 按实际存储类型解码单个单元格
pub(crate) fn decode_value(row: &SqliteRow, idx: usize) -> StationResult<FieldValue> {
    let type_name = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            None
        } else {
            Some(raw.type_info().name().to_string())
        }
    };

    let value = match type_name.as_deref() {
        None => FieldValue::Null,
        Some("INTEGER") => FieldValue::Integer(row.try_get::<i64, _>(idx)?),
        Some("REAL") => FieldValue::Real(row.try_get::<f64, _>(idx)?),
        Some("BLOB") => {
            let bytes = row.try_get::<Vec<u8>, _>(idx)?;
            FieldValue::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        Some(_) => FieldValue::Text(row.try_get::<String, _>(idx)?),
    };
    Ok(value)
}

fn record_from_fields(mut fields: FieldMap) -> StationResult<ChemicalRecord> {
    let product_id = fields
        .remove(columns::PRODUCT_ID)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| StationError::Storage(sqlx::Error::ColumnNotFound(columns::PRODUCT_ID.into())))?;
    let warehouse_id = fields.remove(columns::WAREHOUSE_ID).and_then(|v| v.as_i64());
    let entered_at = fields
        .remove(columns::ENTERED_AT)
        .filter(|v| !v.is_null())
        .map(|v| v.to_string());
    let net_content = fields.remove(columns::NET_CONTENT).and_then(|v| v.as_f64());

    debug!("读取记录 {}: {} 个附加字段", product_id, fields.len());
    Ok(ChemicalRecord {
        product_id,
        warehouse_id,
        entered_at,
        net_content,
        attributes: fields,
    })
}

fn change_log_from_fields(mut fields: FieldMap) -> StationResult<ChangeLogEntry> {
    let log_id = fields
        .remove(columns::LOG_ID)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| StationError::Storage(sqlx::Error::ColumnNotFound(columns::LOG_ID.into())))?;
    let product_id = fields
        .remove(columns::PRODUCT_ID)
        .and_then(|v| v.as_i64())
        .unwrap_or_default();
    let updated_at = fields
        .remove(columns::UPDATED_AT)
        .filter(|v| !v.is_null())
        .map(|v| v.to_string());
    let net_content = fields.remove(columns::NET_CONTENT).and_then(|v| v.as_f64());

    Ok(ChangeLogEntry {
        log_id,
        product_id,
        updated_at,
        net_content,
        attributes: fields,
    })
}
