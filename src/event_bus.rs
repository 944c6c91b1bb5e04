// 事件总线 - 外设 worker、OCR、控制台向控制线程汇聚事件
//
// 所有生产者共用一个无界 mpsc 通道，控制线程是唯一的消费者，
// 按到达顺序逐个处理，工作流状态只在控制线程上修改

use crate::commands::OperatorCommand;
use crate::error::ServiceError;
use crate::peripherals::WeightSample;
use chrono::{DateTime, Local};
use image::DynamicImage;
use std::sync::Arc;
use tokio::sync::mpsc;

/// 工作站事件
#[derive(Debug, Clone)]
pub enum StationEvent {
    // --- 外设事件 ---

    /// 摄像头捕获到新画面
    FrameCaptured {
        frame: Arc<DynamicImage>,
        captured_at: DateTime<Local>,
    },

    /// 扫码枪读到二维码内容
    ScanReceived { token: String },

    /// 电子秤读数
    WeightSampled { sample: WeightSample },

    /// 外设 I/O 失败，对应 worker 已退出
    PeripheralFailed { device: String, message: String },

    // --- OCR 事件 ---

    /// OCR 识别完成
    OcrCompleted { text: String },

    /// OCR 识别失败
    OcrFailed { error: ServiceError },

    // --- 操作员事件 ---

    /// 控制台命令
    Operator(OperatorCommand),

    /// 退出工作站
    Shutdown,
}

/// 事件总线发送端，可以任意克隆给各 worker
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: mpsc::UnboundedSender<StationEvent>,
}

/// 控制线程持有的接收端
pub type EventReceiver = mpsc::UnboundedReceiver<StationEvent>;

impl EventBus {
    /// 创建事件总线，返回发送端和唯一的接收端
    pub fn new() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// 发布事件
    ///
    /// 控制线程已退出时返回 false，worker 据此结束循环
    pub fn publish(&self, event: StationEvent) -> bool {
        match self.sender.send(event) {
            Ok(()) => true,
            Err(_) => {
                tracing::trace!("事件已发布但控制线程已退出");
                false
            }
        }
    }

    /// 控制线程是否已退出
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
