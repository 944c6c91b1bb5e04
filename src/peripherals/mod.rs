// 外设模块 - 电子秤、扫码枪、标签打印机、摄像头
//
// 每个外设一个后台 worker，只通过 EventBus 向控制线程发布事件；
// 控制线程不直接做任何阻塞的外设 I/O

pub mod camera;
pub mod printer;
pub mod scale;
pub mod scanner;

pub use camera::CameraWorker;
pub use printer::{encode_label, LabelPrinter};
pub use scale::{parse_scale_buffer, ScaleWorker, WeightSample};
pub use scanner::{decode_scan, ScannerWorker, SCANNER_TRIGGER_COMMAND};

use crate::error::{StationError, StationResult};
use crate::event_bus::{EventBus, StationEvent};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 串口读取超时，worker 借此周期性检查停止标志
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// 串口连接 - 真实串口和测试替身都实现 Read + Write
pub trait SerialLink: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> SerialLink for T {}

/// 外设种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Scanner,
    Scale,
    Printer,
    Camera,
}

impl DeviceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scanner => "扫码枪",
            Self::Scale => "电子秤",
            Self::Printer => "打印机",
            Self::Camera => "摄像头",
        }
    }
}

/// 串口设备打开接口 - 控制器通过它拿到串口，测试中可替换
pub trait DeviceHub: Send + Sync {
    fn open(&self, kind: DeviceKind, port: &str, baud_rate: u32) -> StationResult<Box<dyn SerialLink>>;
}

/// 基于 serialport 的真实设备
pub struct SerialDeviceHub;

impl DeviceHub for SerialDeviceHub {
    fn open(&self, kind: DeviceKind, port: &str, baud_rate: u32) -> StationResult<Box<dyn SerialLink>> {
        if port.trim().is_empty() {
            return Err(StationError::peripheral(kind.name(), "未设置串口"));
        }

        let link = serialport::new(port, baud_rate)
            .timeout(SERIAL_READ_TIMEOUT)
            .open()
            .map_err(|e| StationError::peripheral(kind.name(), format!("打开串口 {} 失败: {}", port, e)))?;

        info!("{} 串口已打开: {} @ {}", kind.name(), port, baud_rate);
        Ok(Box::new(link))
    }
}

/// 禁用外设时使用，打开任何设备都失败
pub struct DisabledDeviceHub;

impl DeviceHub for DisabledDeviceHub {
    fn open(&self, kind: DeviceKind, _port: &str, _baud_rate: u32) -> StationResult<Box<dyn SerialLink>> {
        Err(StationError::peripheral(kind.name(), "外设已禁用，请使用 scan / weigh 命令手工输入"))
    }
}

/// 后台 worker 句柄
///
/// 停止时先置停止标志，在限定时间内等待退出，超时则强制中止。
/// 阻塞线程上的 worker 无法被 abort 打断，它们每次读串口后和每次发布前都检查
/// 停止标志，所以强制停止后不会再发布事件，当前读取返回后即退出并关闭串口
pub struct WorkerHandle {
    name: &'static str,
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn new(name: &'static str, stop: Arc<AtomicBool>, task: JoinHandle<()>) -> Self {
        Self { name, stop, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 停止 worker，返回是否在限定时间内正常退出
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        self.stop.store(true, Ordering::SeqCst);

        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(_) => {
                info!("{} 已停止", self.name);
                true
            }
            Err(_) => {
                warn!("{} 未在 {:?} 内退出，不再等待（之后读到的数据不会发布）", self.name, grace);
                // 只对异步任务有效，阻塞线程靠停止标志自行退出
                self.task.abort();
                false
            }
        }
    }
}

/// 新建停止标志
pub fn stop_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

/// 分段睡眠，停止标志置位时提前返回；返回 true 表示应当退出
pub fn sleep_unless_stopped(stop: &AtomicBool, duration: Duration) -> bool {
    let step = Duration::from_millis(20);
    let mut remaining = duration;
    while !remaining.is_zero() {
        if stop.load(Ordering::SeqCst) {
            return true;
        }
        let slice = remaining.min(step);
        std::thread::sleep(slice);
        remaining -= slice;
    }
    stop.load(Ordering::SeqCst)
}

/// 停止标志未置位时才发布事件；返回 false 表示 worker 应当退出
pub(crate) fn publish_unless_stopped(stop: &AtomicBool, bus: &EventBus, event: StationEvent) -> bool {
    if stop.load(Ordering::SeqCst) {
        return false;
    }
    bus.publish(event)
}

/// 在 worker 线程上打开串口，失败时发布 PeripheralFailed
pub(crate) fn open_link<F>(kind: DeviceKind, open: F, stop: &AtomicBool, bus: &EventBus) -> Option<Box<dyn SerialLink>>
where
    F: FnOnce() -> StationResult<Box<dyn SerialLink>>,
{
    match open() {
        Ok(link) => Some(link),
        Err(e) => {
            error!("{} 打开失败: {}", kind.name(), e);
            publish_unless_stopped(
                stop,
                bus,
                StationEvent::PeripheralFailed {
                    device: kind.name().to_string(),
                    message: e.to_string(),
                },
            );
            None
        }
    }
}

/// 读一次串口；超时视为没有数据
pub(crate) fn read_available(link: &mut dyn SerialLink, buf: &mut [u8]) -> std::io::Result<usize> {
    match link.read(buf) {
        Ok(n) => Ok(n),
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
            ) =>
        {
            Ok(0)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 测试用串口替身

    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// 按块返回预置数据，读完后一直超时；写入的数据记录在共享缓冲区
    pub struct FakeLink {
        pub chunks: VecDeque<Vec<u8>>,
        pub written: Arc<Mutex<Vec<u8>>>,
        pub fail_reads: bool,
        /// 每次返回数据前的阻塞时间，模拟卡住的串口
        pub read_delay: Duration,
    }

    impl FakeLink {
        pub fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks: chunks.into(),
                written: Arc::new(Mutex::new(Vec::new())),
                fail_reads: false,
                read_delay: Duration::ZERO,
            }
        }
    }

    impl Read for FakeLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.fail_reads {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
            }
            match self.chunks.pop_front() {
                Some(chunk) => {
                    std::thread::sleep(self.read_delay);
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                None => {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    Err(io::Error::new(io::ErrorKind::TimedOut, "timeout"))
                }
            }
        }
    }

    impl Write for FakeLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
