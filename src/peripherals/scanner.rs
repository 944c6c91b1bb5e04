// 扫码枪 - 周期发送触发指令，读取二维码内容

use super::{open_link, publish_unless_stopped, read_available, stop_flag, DeviceKind, SerialLink, WorkerHandle};
use crate::error::StationResult;
use crate::event_bus::{EventBus, StationEvent};
use crate::models::ScannerSettings;
use std::io::Write;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 触发一次扫码的指令
pub const SCANNER_TRIGGER_COMMAND: [u8; 9] = [0x7E, 0x00, 0x08, 0x01, 0x00, 0x02, 0x01, 0xAB, 0xCD];

/// 解析配置中的噪声帧（十六进制），非法的条目跳过
pub fn parse_sentinels(hex_frames: &[String]) -> Vec<Vec<u8>> {
    hex_frames
        .iter()
        .filter_map(|frame| {
            let compact: String = frame.split_whitespace().collect();
            match hex::decode(&compact) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!("忽略无效的噪声帧配置 {:?}: {}", frame, e);
                    None
                }
            }
        })
        .collect()
}

/// 解码一次读到的扫码数据
///
/// 与噪声帧完全相同的数据丢弃；其余按 GBK 解码并去掉首尾空白，
/// 含无法解码字节的数据整帧丢弃
pub fn decode_scan(data: &[u8], sentinels: &[Vec<u8>]) -> Option<String> {
    if data.is_empty() || sentinels.iter().any(|s| s.as_slice() == data) {
        return None;
    }

    let (decoded, _, had_errors) = encoding_rs::GBK.decode(data);
    if had_errors {
        warn!("丢弃无法解码的扫码数据: {}", hex::encode(data));
        return None;
    }

    let token = decoded.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// 扫码枪 worker
pub struct ScannerWorker;

impl ScannerWorker {
    /// 在阻塞线程上打开串口并启动扫码循环
    ///
    /// `open` 在 worker 线程上执行，打开失败时发布 PeripheralFailed
    pub fn spawn<F>(open: F, settings: ScannerSettings, bus: EventBus) -> WorkerHandle
    where
        F: FnOnce() -> StationResult<Box<dyn SerialLink>> + Send + 'static,
    {
        let stop = stop_flag();
        let flag = stop.clone();
        let trigger_interval = Duration::from_millis(settings.trigger_interval_ms);
        let sentinels = parse_sentinels(&settings.noise_sentinels);

        let task = tokio::task::spawn_blocking(move || {
            let Some(mut link) = open_link(DeviceKind::Scanner, open, &flag, &bus) else {
                return;
            };
            info!("扫码枪开始工作: {}", settings.port);
            let mut buf = [0u8; 512];
            let mut last_trigger: Option<Instant> = None;

            while !flag.load(Ordering::SeqCst) {
                if last_trigger.map_or(true, |at| at.elapsed() >= trigger_interval) {
                    if let Err(e) = link.write_all(&SCANNER_TRIGGER_COMMAND).and_then(|_| link.flush()) {
                        error!("扫码枪触发指令发送失败: {}", e);
                        publish_unless_stopped(&flag, &bus, failure(e));
                        break;
                    }
                    last_trigger = Some(Instant::now());
                }

                let read = read_available(link.as_mut(), &mut buf);
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                match read {
                    Ok(0) => {}
                    Ok(n) => {
                        if let Some(token) = decode_scan(&buf[..n], &sentinels) {
                            debug!("接收到的数据: {}", token);
                            if !publish_unless_stopped(&flag, &bus, StationEvent::ScanReceived { token }) {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("扫码枪串口读取失败: {}", e);
                        publish_unless_stopped(&flag, &bus, failure(e));
                        break;
                    }
                }
            }
            // link 在此释放，串口随之关闭
            info!("扫码枪停止工作");
        });

        WorkerHandle::new("扫码枪", stop, task)
    }
}

fn failure(e: std::io::Error) -> StationEvent {
    StationEvent::PeripheralFailed {
        device: DeviceKind::Scanner.name().to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::testing::FakeLink;

    fn default_sentinels() -> Vec<Vec<u8>> {
        parse_sentinels(&ScannerSettings::default().noise_sentinels)
    }

    #[test]
    fn test_noise_frame_is_dropped() {
        let sentinels = default_sentinels();
        assert_eq!(sentinels, vec![vec![0x02, 0x00, 0x00, 0x01, 0x00, 0x33, 0x31]]);
        assert_eq!(decode_scan(&[0x02, 0x00, 0x00, 0x01, 0x00, 0x33, 0x31], &sentinels), None);
        assert_eq!(decode_scan(b"1:12\r\n", &sentinels), Some("1:12".to_string()));
        assert_eq!(decode_scan(b"  \r\n", &sentinels), None);
    }

    #[test]
    fn test_decode_gbk_payload() {
        let (data, _, _) = encoding_rs::GBK.encode("仓1");
        assert_ne!(data.as_ref(), "仓1".as_bytes());
        assert_eq!(decode_scan(&data, &[]), Some("仓1".to_string()));
    }

    #[test]
    fn test_undecodable_frame_is_dropped() {
        // 0xFF 不是合法的 GBK 字节
        assert_eq!(decode_scan(b"1:\xFF12", &[]), None);
        // 双字节首字节后跟非法尾字节
        assert_eq!(decode_scan(&[b'1', b':', 0x81, 0x20], &[]), None);
    }

    #[test]
    fn test_invalid_sentinel_config_is_skipped() {
        let parsed = parse_sentinels(&["zz".to_string(), "02 00 33".to_string()]);
        assert_eq!(parsed, vec![vec![0x02, 0x00, 0x33]]);
    }

    #[tokio::test]
    async fn test_scanner_triggers_and_publishes_tokens() {
        let (bus, mut receiver) = EventBus::new();
        let link = FakeLink::new(vec![
            vec![0x02, 0x00, 0x00, 0x01, 0x00, 0x33, 0x31],
            b"1:12\r\n".to_vec(),
        ]);
        let written = link.written.clone();

        let handle = ScannerWorker::spawn(
            move || Ok(Box::new(link) as Box<dyn SerialLink>),
            ScannerSettings::default(),
            bus,
        );

        match receiver.recv().await {
            Some(StationEvent::ScanReceived { token }) => assert_eq!(token, "1:12"),
            other => panic!("Unexpected event: {:?}", other),
        }
        assert!(handle.shutdown(Duration::from_secs(1)).await);

        let written = written.lock().unwrap();
        assert!(written.starts_with(&SCANNER_TRIGGER_COMMAND));
    }

    #[tokio::test]
    async fn test_scan_read_after_forced_stop_is_not_published() {
        let (bus, mut receiver) = EventBus::new();
        let mut link = FakeLink::new(vec![b"1:12\r\n".to_vec()]);
        link.read_delay = Duration::from_millis(300);

        let handle = ScannerWorker::spawn(
            move || Ok(Box::new(link) as Box<dyn SerialLink>),
            ScannerSettings::default(),
            bus,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown(Duration::from_millis(50)).await;

        // 慢读取结束后线程退出，总线随之关闭，期间没有任何扫码事件
        let late = tokio::time::timeout(Duration::from_secs(2), receiver.recv()).await;
        assert!(matches!(late, Ok(None)), "Unexpected event: {:?}", late);
    }

    #[tokio::test]
    async fn test_open_failure_is_reported() {
        let (bus, mut receiver) = EventBus::new();
        let handle = ScannerWorker::spawn(
            || Err(crate::error::StationError::peripheral("扫码枪", "未设置串口")),
            ScannerSettings::default(),
            bus,
        );

        match receiver.recv().await {
            Some(StationEvent::PeripheralFailed { device, message }) => {
                assert_eq!(device, "扫码枪");
                assert!(message.contains("未设置串口"));
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        assert!(handle.shutdown(Duration::from_secs(1)).await);
    }
}
