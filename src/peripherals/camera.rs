// 摄像头 - 轮询外部采集程序写出的快照文件
//
// 采集程序（如 fswebcam、libcamera-still）周期性覆盖同一个 JPEG 文件，
// 这里按修改时间判断是否有新画面，有则解码后发布 FrameCaptured

use super::{stop_flag, WorkerHandle};
use crate::event_bus::{EventBus, StationEvent};
use crate::models::CameraSettings;
use chrono::Local;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 摄像头快照轮询 worker
pub struct CameraWorker;

impl CameraWorker {
    /// 启动轮询；未配置快照路径时返回 None
    pub fn spawn(settings: CameraSettings, bus: EventBus) -> Option<WorkerHandle> {
        let Some(path) = settings.snapshot_path.clone() else {
            warn!("未配置摄像头快照路径，录入功能不可用");
            return None;
        };

        let stop = stop_flag();
        let flag = stop.clone();
        let period = Duration::from_millis(settings.poll_interval_ms.max(1));

        let task = tokio::spawn(async move {
            info!("摄像头快照轮询开始: {:?}", path);
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_modified: Option<SystemTime> = None;
            let mut last_error: Option<String> = None;

            while !flag.load(Ordering::SeqCst) {
                ticker.tick().await;

                match poll_snapshot(&path, last_modified).await {
                    Ok(Some((modified, frame))) => {
                        last_modified = Some(modified);
                        last_error = None;
                        debug!("摄像头新画面: {}x{}", frame.width(), frame.height());
                        let event = StationEvent::FrameCaptured {
                            frame: Arc::new(frame),
                            captured_at: Local::now(),
                        };
                        if !bus.publish(event) {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => {
                        // 同一个错误只报告一次
                        if last_error.as_deref() != Some(message.as_str()) {
                            warn!("摄像头快照读取失败: {}", message);
                            bus.publish(StationEvent::PeripheralFailed {
                                device: "摄像头".to_string(),
                                message: message.clone(),
                            });
                            last_error = Some(message);
                        }
                    }
                }
            }
            info!("摄像头快照轮询结束");
        });

        Some(WorkerHandle::new("摄像头", stop, task))
    }
}

/// 快照有更新时解码并返回
async fn poll_snapshot(
    path: &PathBuf,
    last_modified: Option<SystemTime>,
) -> Result<Option<(SystemTime, image::DynamicImage)>, String> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| format!("无法读取摄像头画面 {:?}: {}", path, e))?;
    let modified = metadata
        .modified()
        .map_err(|e| format!("无法获取快照修改时间: {}", e))?;

    if last_modified == Some(modified) {
        return Ok(None);
    }

    let path = path.clone();
    let frame = tokio::task::spawn_blocking(move || image::open(&path))
        .await
        .map_err(|e| format!("快照解码任务失败: {}", e))?
        .map_err(|e| format!("快照解码失败: {}", e))?;

    Ok(Some((modified, frame)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_camera_publishes_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.png");
        DynamicImage::ImageRgb8(RgbImage::new(8, 6)).save(&path).unwrap();

        let (bus, mut receiver) = EventBus::new();
        let settings = CameraSettings {
            snapshot_path: Some(path),
            poll_interval_ms: 10,
        };
        let handle = CameraWorker::spawn(settings, bus).unwrap();

        match receiver.recv().await {
            Some(StationEvent::FrameCaptured { frame, .. }) => {
                assert_eq!((frame.width(), frame.height()), (8, 6));
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        assert!(handle.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_missing_snapshot_reported_once() {
        let dir = tempdir().unwrap();
        let (bus, mut receiver) = EventBus::new();
        let settings = CameraSettings {
            snapshot_path: Some(dir.path().join("absent.jpg")),
            poll_interval_ms: 5,
        };
        let handle = CameraWorker::spawn(settings, bus).unwrap();

        assert!(matches!(
            receiver.recv().await,
            Some(StationEvent::PeripheralFailed { .. })
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(receiver.try_recv().is_err());
        assert!(handle.shutdown(Duration::from_secs(1)).await);
    }

    #[test]
    fn test_camera_disabled_without_path() {
        let (bus, _receiver) = EventBus::new();
        assert!(CameraWorker::spawn(CameraSettings::default(), bus).is_none());
    }
}
