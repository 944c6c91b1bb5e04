// Actor模块 - 使用Actor模式管理并发状态
//
// 通过消息传递把耗时的 OCR 调用隔离在独立任务上，控制线程不等待网络

pub mod ocr_dispatcher;

pub use ocr_dispatcher::{OcrCommand, OcrDispatcher, OcrDispatcherActor, OcrHandle};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::event_bus::{EventBus, StationEvent};
    use crate::ocr::OcrService;
    use async_trait::async_trait;
    use image::{DynamicImage, RgbImage};
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedOcr(Result<String, ServiceError>);

    #[async_trait]
    impl OcrService for FixedOcr {
        async fn recognize(&self, jpeg: Vec<u8>) -> Result<String, ServiceError> {
            assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
            self.0.clone()
        }
    }

    /// 永不返回的服务，用于验证强制停止
    struct HangingOcr;

    #[async_trait]
    impl OcrService for HangingOcr {
        async fn recognize(&self, _jpeg: Vec<u8>) -> Result<String, ServiceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    fn frame() -> Arc<DynamicImage> {
        Arc::new(DynamicImage::ImageRgb8(RgbImage::new(4, 4)))
    }

    #[tokio::test]
    async fn test_ocr_actor_health_check() {
        let (bus, _receiver) = EventBus::new();
        let dispatcher = OcrDispatcher::spawn(Arc::new(FixedOcr(Ok(String::new()))), 90, bus);

        assert!(dispatcher.handle().health_check().await, "OCR Actor应该是健康的");
        assert!(dispatcher.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_health_check_fails_when_actor_dropped() {
        let (bus, _receiver) = EventBus::new();
        let (actor, handle) = OcrDispatcherActor::new(Arc::new(FixedOcr(Ok(String::new()))), 90, bus);

        // 不运行Actor，直接drop
        drop(actor);

        assert!(!handle.health_check().await, "停止的Actor应该健康检查失败");
    }

    #[tokio::test]
    async fn test_recognize_publishes_result() {
        let (bus, mut receiver) = EventBus::new();
        let dispatcher = OcrDispatcher::spawn(Arc::new(FixedOcr(Ok("CAS 56-87-1".to_string()))), 90, bus);

        assert!(dispatcher.handle().recognize(frame()).await);
        match receiver.recv().await {
            Some(StationEvent::OcrCompleted { text }) => assert_eq!(text, "CAS 56-87-1"),
            other => panic!("Unexpected event: {:?}", other),
        }
        dispatcher.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_recognize_publishes_failure() {
        let (bus, mut receiver) = EventBus::new();
        let service = FixedOcr(Err(ServiceError::Timeout(5)));
        let dispatcher = OcrDispatcher::spawn(Arc::new(service), 90, bus);

        dispatcher.handle().recognize(frame()).await;
        match receiver.recv().await {
            Some(StationEvent::OcrFailed { error }) => assert_eq!(error, ServiceError::Timeout(5)),
            other => panic!("Unexpected event: {:?}", other),
        }
        dispatcher.stop(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_stop_aborts_request_in_flight() {
        let (bus, mut receiver) = EventBus::new();
        let dispatcher = OcrDispatcher::spawn(Arc::new(HangingOcr), 90, bus);

        dispatcher.handle().recognize(frame()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!dispatcher.stop(Duration::from_millis(100)).await);
        // 被中止的请求不会产生结果
        assert!(receiver.try_recv().is_err());
    }
}
