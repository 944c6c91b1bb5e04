// 标签打印机 - 二维码标签指令生成与串口发送

use super::{DeviceHub, DeviceKind};
use crate::error::{StationError, StationResult};
use crate::models::PrinterSettings;
use std::io::Write;
use std::sync::Arc;
use tracing::info;

/// 设置打印起始位置和范围
const PRINT_AREA: &str = "1A5B01000000008001AA0000";
/// 二维码：版本 01，纠错等级 04，位置 (0x15, 0x15)，尺寸 04，不旋转
const QR_HEADER: &str = "1A31000104150015000400";
/// 第一行文字（与二维码内容相同），字号 11
const CONTENT_TEXT_HEADER: &str = "1A54018000200000600011";
/// 第二行文字（位置说明），字号 11
const CAPTION_TEXT_HEADER: &str = "1A54018000400000600011";
const LABEL_END: &str = "1A5D00";
const FEED: &str = "1A4F00";

/// 生成一张标签的完整指令字节流
///
/// 内容按 UTF-8 编码写入，每段以 0x00 结束
pub fn encode_label(content: &str, caption: &str) -> Vec<u8> {
    let instructions = [
        PRINT_AREA.to_string(),
        format!("{}{}00", QR_HEADER, hex::encode(content)),
        format!("{}{}00", CONTENT_TEXT_HEADER, hex::encode(content)),
        format!("{}{}00", CAPTION_TEXT_HEADER, hex::encode(caption)),
        LABEL_END.to_string(),
        FEED.to_string(),
    ];

    instructions
        .iter()
        .flat_map(|instr| hex_bytes(instr))
        .collect()
}

fn hex_bytes(instr: &str) -> Vec<u8> {
    // 指令全部由本模块拼出，都是合法十六进制
    hex::decode(instr).unwrap_or_default()
}

/// 标签打印机
pub struct LabelPrinter {
    hub: Arc<dyn DeviceHub>,
    settings: PrinterSettings,
}

impl LabelPrinter {
    pub fn new(hub: Arc<dyn DeviceHub>, settings: PrinterSettings) -> Self {
        Self { hub, settings }
    }

    /// 打印一张标签（阻塞，调用方放到 spawn_blocking 中执行）
    pub fn print(&self, content: &str, caption: &str) -> StationResult<()> {
        let mut link = self
            .hub
            .open(DeviceKind::Printer, &self.settings.port, self.settings.baud_rate)?;

        let data = encode_label(content, caption);
        link.write_all(&data)
            .and_then(|_| link.flush())
            .map_err(|e| StationError::peripheral(DeviceKind::Printer.name(), e))?;

        info!("指令已发送到打印机: {} / {}", content, caption);
        Ok(())
    }
}
