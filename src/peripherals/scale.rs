// 电子秤 - 串口读数解析与读数 worker

use super::{
    open_link, publish_unless_stopped, read_available, sleep_unless_stopped, stop_flag, DeviceKind, SerialLink,
    WorkerHandle,
};
use crate::error::StationResult;
use crate::event_bus::{EventBus, StationEvent};
use crate::models::ScaleSettings;
use regex::Regex;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, error, info};

static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?\d*\.\d+|[-+]?\d+").expect("数值正则无效"));

/// 电子秤读数，带显示精度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightSample {
    pub value: f64,
    /// 显示的小数位数
    pub decimals: usize,
}

impl WeightSample {
    pub fn new(value: f64, decimals: usize) -> Self {
        Self {
            value: round_to(value, decimals),
            decimals,
        }
    }

    /// 从原始净含量中扣除本次读数，结果保留相同的小数位数
    pub fn remaining_from(&self, baseline: f64) -> WeightSample {
        WeightSample::new(baseline - self.value, self.decimals)
    }

    /// 解析手工输入的读数，例如 `20.5`
    pub fn parse(text: &str) -> Option<WeightSample> {
        let text = text.trim();
        let value = text.parse::<f64>().ok()?;
        if !value.is_finite() {
            return None;
        }
        Some(WeightSample::new(value, count_decimals(text)))
    }
}

impl fmt::Display for WeightSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.*}", self.decimals, self.value)
    }
}

/// 从一次串口读到的内容中解析读数
///
/// 只取第一个数值，原始值右移 `decimal_shift` 位
pub fn parse_scale_buffer(buffer: &str, decimal_shift: u32) -> Option<WeightSample> {
    let token = NUMBER_PATTERN.find(buffer)?.as_str();
    let raw = token.parse::<f64>().ok()?;
    let value = raw / 10f64.powi(decimal_shift as i32);
    Some(WeightSample::new(
        value,
        count_decimals(token) + decimal_shift as usize,
    ))
}

fn count_decimals(token: &str) -> usize {
    token.split_once('.').map(|(_, frac)| frac.len()).unwrap_or(0)
}

fn round_to(value: f64, decimals: usize) -> f64 {
    let factor = 10f64.powi(decimals.min(15) as i32);
    (value * factor).round() / factor
}

/// 电子秤读数 worker
pub struct ScaleWorker;

impl ScaleWorker {
    /// 在阻塞线程上打开串口并启动读数循环
    ///
    /// 每个轮询周期读一次串口，解析到读数就发布 WeightSampled；
    /// 打开或读取出错时发布 PeripheralFailed 并退出
    pub fn spawn<F>(open: F, settings: ScaleSettings, bus: EventBus) -> WorkerHandle
    where
        F: FnOnce() -> StationResult<Box<dyn SerialLink>> + Send + 'static,
    {
        let stop = stop_flag();
        let flag = stop.clone();
        let poll_interval = Duration::from_millis(settings.poll_interval_ms);

        let task = tokio::task::spawn_blocking(move || {
            let Some(mut link) = open_link(DeviceKind::Scale, open, &flag, &bus) else {
                return;
            };
            info!("电子秤读数开始: {}", settings.port);
            let mut buf = [0u8; 256];

            loop {
                let read = read_available(link.as_mut(), &mut buf);
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                match read {
                    Ok(0) => {}
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buf[..n]);
                        if let Some(sample) = parse_scale_buffer(&text, settings.decimal_shift) {
                            debug!("电子秤读数: {}", sample);
                            if !publish_unless_stopped(&flag, &bus, StationEvent::WeightSampled { sample }) {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("电子秤串口读取失败: {}", e);
                        publish_unless_stopped(
                            &flag,
                            &bus,
                            StationEvent::PeripheralFailed {
                                device: DeviceKind::Scale.name().to_string(),
                                message: e.to_string(),
                            },
                        );
                        break;
                    }
                }

                if sleep_unless_stopped(&flag, poll_interval) {
                    break;
                }
            }
            info!("电子秤读数结束");
        });

        WorkerHandle::new("电子秤", stop, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::testing::FakeLink;

    #[test]
    fn test_parse_scale_buffer_shifts_decimal() {
        let sample = parse_scale_buffer("ST,GS, 0205\r\n", 1).unwrap();
        assert_eq!(sample.value, 20.5);
        assert_eq!(sample.decimals, 1);
        assert_eq!(sample.to_string(), "20.5");

        let sample = parse_scale_buffer("12.34", 1).unwrap();
        assert_eq!(sample.to_string(), "1.234");

        // 只取第一个数值
        let sample = parse_scale_buffer("100 200", 0).unwrap();
        assert_eq!(sample.value, 100.0);
        assert_eq!(sample.decimals, 0);

        assert!(parse_scale_buffer("ERR", 1).is_none());
    }

    #[test]
    fn test_remaining_keeps_sample_precision() {
        let sample = WeightSample::new(20.5, 1);
        let remaining = sample.remaining_from(100.0);
        assert_eq!(remaining.value, 79.5);
        assert_eq!(remaining.to_string(), "79.5");

        let sample = WeightSample::new(0.1, 1);
        assert_eq!(sample.remaining_from(0.3).to_string(), "0.2");
    }

    #[test]
    fn test_parse_manual_weight() {
        assert_eq!(WeightSample::parse(" 20.50 "), Some(WeightSample::new(20.5, 2)));
        assert_eq!(WeightSample::parse("7"), Some(WeightSample::new(7.0, 0)));
        assert!(WeightSample::parse("abc").is_none());
        assert!(WeightSample::parse("inf").is_none());
    }

    #[tokio::test]
    async fn test_scale_worker_publishes_samples() {
        let (bus, mut receiver) = EventBus::new();
        let link = FakeLink::new(vec![b"0205".to_vec(), b"noise".to_vec(), b"0100".to_vec()]);
        let settings = ScaleSettings {
            poll_interval_ms: 1,
            ..ScaleSettings::default()
        };

        let handle = ScaleWorker::spawn(move || Ok(Box::new(link) as Box<dyn SerialLink>), settings, bus);

        let mut values = Vec::new();
        while values.len() < 2 {
            match receiver.recv().await {
                Some(StationEvent::WeightSampled { sample }) => values.push(sample.value),
                other => panic!("Unexpected event: {:?}", other),
            }
        }
        assert_eq!(values, vec![20.5, 10.0]);
        assert!(handle.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_scale_worker_reports_io_failure() {
        let (bus, mut receiver) = EventBus::new();
        let mut link = FakeLink::new(vec![]);
        link.fail_reads = true;

        let handle = ScaleWorker::spawn(
            move || Ok(Box::new(link) as Box<dyn SerialLink>),
            ScaleSettings::default(),
            bus,
        );

        match receiver.recv().await {
            Some(StationEvent::PeripheralFailed { device, .. }) => assert_eq!(device, "电子秤"),
            other => panic!("Unexpected event: {:?}", other),
        }
        assert!(handle.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_sample_read_after_forced_stop_is_not_published() {
        let (bus, mut receiver) = EventBus::new();
        let mut link = FakeLink::new(vec![b"0205".to_vec()]);
        link.read_delay = Duration::from_millis(300);

        let handle = ScaleWorker::spawn(
            move || Ok(Box::new(link) as Box<dyn SerialLink>),
            ScaleSettings::default(),
            bus,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown(Duration::from_millis(50)).await;

        let late = tokio::time::timeout(Duration::from_secs(2), receiver.recv()).await;
        assert!(matches!(late, Ok(None)), "Unexpected event: {:?}", late);
    }
}
