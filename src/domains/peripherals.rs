// 外设领域管理器
//
// 负责串口设备和 OCR 服务
// 测试中可以整体替换为替身实现

use std::sync::Arc;
use crate::ocr::OcrService;
use crate::peripherals::DeviceHub;

/// 外设领域管理器 - 负责串口设备和 OCR 服务
#[derive(Clone)]
pub struct PeripheralDomain {
    hub: Arc<dyn DeviceHub>,
    ocr: Arc<dyn OcrService>,
}

impl PeripheralDomain {
    /// 创建新的外设领域管理器
    pub fn new(hub: Arc<dyn DeviceHub>, ocr: Arc<dyn OcrService>) -> Self {
        Self { hub, ocr }
    }

    /// 获取串口设备
    pub fn get_hub(&self) -> &Arc<dyn DeviceHub> {
        &self.hub
    }

    /// 获取 OCR 服务
    pub fn get_ocr(&self) -> &Arc<dyn OcrService> {
        &self.ocr
    }
}
