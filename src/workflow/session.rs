// 工作站会话 - 控制线程独占的运行时状态

use super::state::WorkflowState;
use crate::peripherals::WeightSample;
use chrono::{DateTime, Local};
use image::DynamicImage;
use std::sync::Arc;

/// 最近一次保存的录入，用于打印标签
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedEntry {
    pub warehouse_id: i64,
    pub product_id: i64,
    pub position: Option<String>,
}

impl SavedEntry {
    /// 二维码内容
    pub fn label_content(&self) -> String {
        format!("{}:{}", self.warehouse_id, self.product_id)
    }

    /// 标签第二行文字
    pub fn label_caption(&self) -> String {
        self.position
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or("未知位置")
            .to_string()
    }
}

/// 摄像头最新画面
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub image: Arc<DynamicImage>,
    pub captured_at: DateTime<Local>,
}

/// 最近显示的电子秤读数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub sample: WeightSample,
    pub remaining: Option<WeightSample>,
}

#[derive(Debug)]
pub struct StationSession {
    pub state: WorkflowState,
    pub latest_frame: Option<CapturedFrame>,
    pub last_saved: Option<SavedEntry>,
    pub last_reading: Option<Reading>,
    pub warehouse_id: i64,
}

impl StationSession {
    pub fn new(warehouse_id: i64) -> Self {
        Self {
            state: WorkflowState::Idle,
            latest_frame: None,
            last_saved: None,
            last_reading: None,
            warehouse_id,
        }
    }

    /// status 命令的一行摘要
    pub fn status_line(&self) -> String {
        let frame = match &self.latest_frame {
            Some(frame) => frame.captured_at.format("%H:%M:%S").to_string(),
            None => "无".to_string(),
        };
        let reading = match &self.last_reading {
            Some(Reading {
                sample,
                remaining: Some(remaining),
            }) => format!("{}（剩余 {}）", sample, remaining),
            Some(Reading { sample, .. }) => sample.to_string(),
            None => "无".to_string(),
        };
        let saved = self
            .last_saved
            .as_ref()
            .map(SavedEntry::label_content)
            .unwrap_or_else(|| "无".to_string());

        format!(
            "状态: {} | 仓库: {} | 最新画面: {} | 读数: {} | 最近录入: {}",
            self.state.name(),
            self.warehouse_id,
            frame,
            reading,
            saved
        )
    }
}
