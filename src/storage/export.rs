// 数据导出 - 首次录入数据、使用历史、各产品最新数据导出为 CSV

use super::models::*;
use super::repository::RecordRepository;
use anyhow::{anyhow, Result};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// 导出类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// 首次录入数据
    Records,
    /// 使用历史
    History,
    /// 各产品最新数据
    Latest,
}

impl FromStr for ExportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "records" | "首次录入数据" => Ok(Self::Records),
            "history" | "使用历史" => Ok(Self::History),
            "latest" | "最新数据" => Ok(Self::Latest),
            other => Err(anyhow!("未知的导出类型: {}", other)),
        }
    }
}

/// 最新数据导出中附加的列
const LATEST_UPDATED_COLUMN: &str = "最新更新时间";

/// 执行导出，返回导出的行数
///
/// 先从记录库取出全部行，再在阻塞线程上写文件
pub async fn export_csv(repo: &dyn RecordRepository, kind: ExportKind, path: &Path) -> Result<usize> {
    let (header, rows) = collect_rows(repo, kind).await?;
    let count = rows.len();

    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_csv(&target, &header, &rows)).await??;

    info!("导出 {:?} 完成: {} 行 -> {:?}", kind, count, path);
    Ok(count)
}

async fn collect_rows(repo: &dyn RecordRepository, kind: ExportKind) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    match kind {
        ExportKind::Records => {
            let header = repo.columns(RECORDS_TABLE).await?;
            let rows: Vec<Vec<String>> = repo
                .all_records()
                .await?
                .iter()
                .map(|record| header.iter().map(|col| record_cell(record, col)).collect::<Vec<_>>())
                .collect();
            Ok((header, rows))
        }
        ExportKind::History => {
            let header = repo.columns(CHANGE_LOGS_TABLE).await?;
            let rows: Vec<Vec<String>> = repo
                .all_change_logs()
                .await?
                .iter()
                .map(|log| header.iter().map(|col| change_log_cell(log, col)).collect::<Vec<_>>())
                .collect();
            Ok((header, rows))
        }
        ExportKind::Latest => {
            let mut header = repo.columns(RECORDS_TABLE).await?;
            header.push(LATEST_UPDATED_COLUMN.to_string());
            let rows: Vec<Vec<String>> = repo
                .latest_records()
                .await?
                .iter()
                .map(|item| {
                    header
                        .iter()
                        .map(|col| {
                            if col == LATEST_UPDATED_COLUMN {
                                item.last_updated_at.clone().unwrap_or_default()
                            } else {
                                record_cell(&item.record, col)
                            }
                        })
                        .collect::<Vec<_>>()
                })
                .collect();
            Ok((header, rows))
        }
    }
}

fn write_csv(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn record_cell(record: &ChemicalRecord, column: &str) -> String {
    match column {
        columns::PRODUCT_ID => record.product_id.to_string(),
        columns::WAREHOUSE_ID => opt_to_string(record.warehouse_id),
        columns::ENTERED_AT => record.entered_at.clone().unwrap_or_default(),
        columns::NET_CONTENT => opt_to_string(record.net_content),
        other => record
            .attributes
            .get(other)
            .map(|v| v.to_string())
            .unwrap_or_default(),
    }
}

fn change_log_cell(log: &ChangeLogEntry, column: &str) -> String {
    match column {
        columns::LOG_ID => log.log_id.to_string(),
        columns::PRODUCT_ID => log.product_id.to_string(),
        columns::UPDATED_AT => log.updated_at.clone().unwrap_or_default(),
        columns::NET_CONTENT => opt_to_string(log.net_content),
        other => log
            .attributes
            .get(other)
            .map(|v| v.to_string())
            .unwrap_or_default(),
    }
}

fn opt_to_string<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
