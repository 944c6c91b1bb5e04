//! 应用程序初始化和启动
//!
//! 负责工作站的完整启动流程，包括：
//! - 日志系统初始化
//! - 配置与凭据文件加载
//! - 各领域模块初始化
//! - 摄像头 worker 与控制台任务启动
//! - 控制线程运行直到退出

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::commands::parse_command;
use crate::domains::{PeripheralDomain, StorageDomain};
use crate::event_bus::{EventBus, StationEvent};
use crate::logger::{self, LogMessage, OperatorConsole};
use crate::ocr::{HttpOcrClient, OcrService};
use crate::peripherals::{CameraWorker, DeviceHub, DisabledDeviceHub, SerialDeviceHub};
use crate::settings::{CredentialStore, SettingsManager};
use crate::storage::{ChemicalCatalog, RecordRepository, SqliteRecordStore};
use crate::workflow::StationController;

/// 控制台保留的操作日志条数
const CONSOLE_HISTORY: usize = 200;

/// 退出时等待剩余提示打印完成的时间
const CONSOLE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// 启动参数
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// settings.json 与 credentials.json 所在目录
    pub config_dir: PathBuf,
    /// 记录库、参考库和日志的默认目录
    pub data_dir: PathBuf,
    /// 不打开任何外设，扫码和称重只能手工输入
    pub no_peripherals: bool,
    /// 内部日志同时输出到标准输出
    pub echo_stdout: bool,
}

/// 应用程序入口点
///
/// 日志初始化后创建运行时，退出时最多等待 1 秒让阻塞任务（标准输入读取）结束
pub fn run(options: LaunchOptions) -> anyhow::Result<()> {
    let console = Arc::new(OperatorConsole::new(CONSOLE_HISTORY));
    let _guard = logger::init_with_console(
        console.clone(),
        &options.data_dir.join("logs"),
        options.echo_stdout,
    )
    .context("日志系统初始化失败")?;

    let runtime = tokio::runtime::Runtime::new().context("无法创建 tokio 运行时")?;
    let result = runtime.block_on(serve(options, console));
    runtime.shutdown_timeout(Duration::from_secs(1));

    if let Err(e) = &result {
        error!("工作站异常退出: {:#}", e);
    }
    result
}

async fn serve(options: LaunchOptions, console: Arc<OperatorConsole>) -> anyhow::Result<()> {
    info!("初始化试剂管理工作站...");

    // 配置
    let settings = Arc::new(
        SettingsManager::new(options.config_dir.join("settings.json"))
            .await
            .context("设置管理器初始化失败")?,
    );
    let credentials = Arc::new(
        CredentialStore::load(options.config_dir.join("credentials.json"))
            .await
            .context("凭据文件加载失败")?,
    );
    let config = settings.get().await;
    info!("已加载配置，仓库编号: {}", config.warehouse_id);

    // 记录库
    let db_path = config
        .database_path
        .clone()
        .unwrap_or_else(|| options.data_dir.join("reagent.db"));
    let repo: Arc<dyn RecordRepository> = Arc::new(
        SqliteRecordStore::new(&db_path.to_string_lossy())
            .await
            .with_context(|| format!("记录库初始化失败: {:?}", db_path))?
            .with_required_fields(config.required_fields.clone()),
    );

    // 参考库缺失或损坏都不影响启动
    let catalog_path = config
        .catalog_path
        .clone()
        .unwrap_or_else(|| options.data_dir.join("chemicals.db"));
    let catalog = match ChemicalCatalog::open(&catalog_path).await {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!("化学品参考库打开失败，CAS 自动补全不可用: {}", e);
            ChemicalCatalog::disabled()
        }
    };

    // OCR 客户端（复用连接池）
    let http_client = reqwest::Client::builder()
        .pool_max_idle_per_host(2)
        .build()
        .context("无法创建 HTTP 客户端")?;
    let ocr: Arc<dyn OcrService> = Arc::new(HttpOcrClient::new(http_client, &config.ocr));
    info!("OCR 服务地址: {}", config.ocr.url);

    let hub: Arc<dyn DeviceHub> = if options.no_peripherals {
        warn!("外设已禁用，扫码和称重请使用 scan / weigh 命令");
        Arc::new(DisabledDeviceHub)
    } else {
        Arc::new(SerialDeviceHub)
    };

    let storage = StorageDomain::new(repo, Arc::new(catalog), settings, credentials);
    let peripherals = PeripheralDomain::new(hub, ocr);
    info!("领域管理器已初始化完成");

    let (bus, receiver) = EventBus::new();

    let camera = if options.no_peripherals {
        None
    } else {
        CameraWorker::spawn(config.camera.clone(), bus.clone())
    };
    if camera.is_none() {
        warn!("未配置摄像头画面，录入功能不可用");
    }

    let (printer_done, done) = oneshot::channel();
    let printer = tokio::spawn(print_operator_log(console.subscribe(), done, std::io::stderr()));
    tokio::spawn(read_operator_commands(bus.clone()));

    let grace = Duration::from_millis(config.worker_join_timeout_ms);
    let controller = StationController::new(config, storage, peripherals, bus);
    eprintln!("试剂管理工作站已就绪，输入 help 查看命令");
    controller.run(receiver).await;

    if let Some(camera) = camera {
        camera.shutdown(grace).await;
    }
    info!("工作站已退出");

    let _ = printer_done.send(());
    if tokio::time::timeout(CONSOLE_DRAIN_TIMEOUT, printer).await.is_err() {
        warn!("操作提示未能在退出前全部打印");
    }
    Ok(())
}

/// 逐行读取标准输入，解析后作为操作员命令发布；输入结束视为退出
async fn read_operator_commands(bus: EventBus) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_command(&line) {
                Ok(Some(command)) => {
                    if !bus.publish(StationEvent::Operator(command)) {
                        break;
                    }
                }
                Ok(None) => {}
                Err(message) => eprintln!("{}", message),
            },
            Ok(None) => {
                info!("标准输入已关闭");
                bus.publish(StationEvent::Shutdown);
                break;
            }
            Err(e) => {
                error!("读取标准输入失败: {}", e);
                bus.publish(StationEvent::Shutdown);
                break;
            }
        }
    }
}

/// 把面向操作员的日志写到 `out`（通常是标准错误）
///
/// 收到 `done` 后先把已经排队的提示写完再返回
async fn print_operator_log<W: Write>(
    mut receiver: broadcast::Receiver<LogMessage>,
    mut done: oneshot::Receiver<()>,
    mut out: W,
) -> W {
    loop {
        tokio::select! {
            biased;
            received = receiver.recv() => match received {
                Ok(log) => write_log(&mut out, &log),
                Err(RecvError::Lagged(skipped)) => {
                    let _ = writeln!(out, "（跳过 {} 条提示）", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut done => {
                while let Ok(log) = receiver.try_recv() {
                    write_log(&mut out, &log);
                }
                break;
            }
        }
    }
    let _ = out.flush();
    out
}

fn write_log<W: Write>(out: &mut W, log: &LogMessage) {
    let _ = writeln!(out, "[{}] {}", log.level, log.message);
}
