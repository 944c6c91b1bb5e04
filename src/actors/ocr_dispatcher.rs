// OCR Dispatcher Actor - 串行处理识别请求
//
// 控制线程只投递画面，编码和 HTTP 调用都在 Actor 任务上完成，
// 结果以 OcrCompleted / OcrFailed 事件回到控制线程

use std::sync::Arc;
use std::time::Duration;

use image::DynamicImage;
use tokio::sync::{mpsc, oneshot};

use crate::event_bus::{EventBus, StationEvent};
use crate::ocr::{encode_jpeg, OcrService};
use crate::peripherals::{stop_flag, WorkerHandle};

/// OCR 命令
pub enum OcrCommand {
    /// 识别一帧画面
    Recognize { frame: Arc<DynamicImage> },

    /// 健康检查
    HealthCheck { reply: oneshot::Sender<bool> },
}

/// OCR Actor
pub struct OcrDispatcherActor {
    receiver: mpsc::Receiver<OcrCommand>,
    service: Arc<dyn OcrService>,
    jpeg_quality: u8,
    bus: EventBus,
}

impl OcrDispatcherActor {
    /// 创建新的Actor
    pub fn new(service: Arc<dyn OcrService>, jpeg_quality: u8, bus: EventBus) -> (Self, OcrHandle) {
        let (sender, receiver) = mpsc::channel(4);
        let actor = Self {
            receiver,
            service,
            jpeg_quality,
            bus,
        };
        (actor, OcrHandle { sender })
    }

    /// 运行Actor，所有 Handle 被丢弃后退出
    pub async fn run(mut self) {
        tracing::info!("OCR Actor 已启动");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                OcrCommand::Recognize { frame } => {
                    let event = match self.recognize(frame).await {
                        Ok(text) => {
                            tracing::info!("OCR识别完成: {} 字符", text.chars().count());
                            StationEvent::OcrCompleted { text }
                        }
                        Err(error) => {
                            tracing::warn!("OCR识别失败: {}", error);
                            StationEvent::OcrFailed { error }
                        }
                    };
                    if !self.bus.publish(event) {
                        break;
                    }
                }

                OcrCommand::HealthCheck { reply } => {
                    let _ = reply.send(true);
                }
            }
        }

        tracing::info!("OCR Actor 已停止");
    }

    async fn recognize(&self, frame: Arc<DynamicImage>) -> Result<String, crate::error::ServiceError> {
        let quality = self.jpeg_quality;
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality))
            .await
            .map_err(|e| crate::error::ServiceError::Decode(format!("图像编码任务失败: {}", e)))??;
        self.service.recognize(jpeg).await
    }
}

/// OCR Handle
#[derive(Clone)]
pub struct OcrHandle {
    sender: mpsc::Sender<OcrCommand>,
}

impl OcrHandle {
    /// 投递一帧画面，Actor 已停止时返回 false
    pub async fn recognize(&self, frame: Arc<DynamicImage>) -> bool {
        self.sender.send(OcrCommand::Recognize { frame }).await.is_ok()
    }

    /// 健康检查
    pub async fn health_check(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.sender.send(OcrCommand::HealthCheck { reply }).await.is_err() {
            return false;
        }
        matches!(
            tokio::time::timeout(Duration::from_secs(1), rx).await,
            Ok(Ok(true))
        )
    }
}

/// 运行中的 OCR Actor 及其任务
pub struct OcrDispatcher {
    handle: OcrHandle,
    worker: WorkerHandle,
}

impl OcrDispatcher {
    /// 在后台任务上启动 Actor
    pub fn spawn(service: Arc<dyn OcrService>, jpeg_quality: u8, bus: EventBus) -> Self {
        let (actor, handle) = OcrDispatcherActor::new(service, jpeg_quality, bus);
        let task = tokio::spawn(actor.run());
        Self {
            handle,
            worker: WorkerHandle::new("OCR", stop_flag(), task),
        }
    }

    pub fn handle(&self) -> &OcrHandle {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }

    /// 关闭通道并等待 Actor 退出；进行中的请求超过限定时间则被中止
    pub async fn stop(self, grace: Duration) -> bool {
        drop(self.handle);
        self.worker.shutdown(grace).await
    }
}
