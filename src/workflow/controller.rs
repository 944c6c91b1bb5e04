// 工作站控制器 - 唯一消费事件总线的控制线程
//
// 外设、OCR、控制台事件按到达顺序逐个处理：先交给状态机得到副作用，
// 再由这里执行存储、OCR、外设操作，结果作为新的工作流事件继续送入状态机

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::scan::resolve_scan;
use super::session::{CapturedFrame, Reading, SavedEntry, StationSession};
use super::state::{transition, Effect, NoticeLevel, WorkflowEvent, WorkflowState};
use crate::actors::OcrDispatcher;
use crate::commands::{OperatorCommand, HELP_TEXT};
use crate::domains::{PeripheralDomain, StorageDomain};
use crate::error::ServiceError;
use crate::event_bus::{EventBus, EventReceiver, StationEvent};
use crate::logger::OPERATOR_TARGET;
use crate::models::{PersistedStationConfig, ScaleSettings, StationConfigUpdate};
use crate::peripherals::{DeviceKind, LabelPrinter, ScaleWorker, ScannerWorker, WorkerHandle};
use crate::storage::{columns, export_csv};
use crate::utils::validate_warehouse_id;

/// 向操作员输出提示
fn notify(level: NoticeLevel, message: &str) {
    match level {
        NoticeLevel::Info => info!(target: OPERATOR_TARGET, "{}", message),
        NoticeLevel::Warn => warn!(target: OPERATOR_TARGET, "{}", message),
        NoticeLevel::Error => error!(target: OPERATOR_TARGET, "{}", message),
    }
}

/// 处理完一个事件后是否继续运行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct StationController {
    session: StationSession,
    config: PersistedStationConfig,
    storage: StorageDomain,
    peripherals: PeripheralDomain,
    bus: EventBus,
    ocr: Option<OcrDispatcher>,
    usage_workers: Vec<WorkerHandle>,
}

impl StationController {
    pub fn new(
        config: PersistedStationConfig,
        storage: StorageDomain,
        peripherals: PeripheralDomain,
        bus: EventBus,
    ) -> Self {
        Self {
            session: StationSession::new(config.warehouse_id),
            config,
            storage,
            peripherals,
            bus,
            ocr: None,
            usage_workers: Vec::new(),
        }
    }

    pub fn session(&self) -> &StationSession {
        &self.session
    }

    fn grace(&self) -> Duration {
        Duration::from_millis(self.config.worker_join_timeout_ms)
    }

    /// 控制线程主循环，收到退出命令或所有发送端关闭后返回
    pub async fn run(mut self, mut receiver: EventReceiver) {
        info!("工作站控制线程已启动");

        while let Some(event) = receiver.recv().await {
            if self.handle_event(event).await == Flow::Quit {
                break;
            }
        }

        self.shutdown().await;
        info!("工作站控制线程已停止");
    }

    /// 停止所有后台任务
    pub async fn shutdown(&mut self) {
        self.stop_usage_workers().await;
        if let Some(dispatcher) = self.ocr.take() {
            dispatcher.stop(self.grace()).await;
        }
    }

    /// 处理一个总线事件
    pub async fn handle_event(&mut self, event: StationEvent) -> Flow {
        match event {
            StationEvent::FrameCaptured { frame, captured_at } => {
                self.session.latest_frame = Some(CapturedFrame {
                    image: frame,
                    captured_at,
                });
            }
            StationEvent::ScanReceived { token } => {
                self.dispatch(WorkflowEvent::ScanReceived { token }).await;
            }
            StationEvent::WeightSampled { sample } => {
                self.dispatch(WorkflowEvent::WeightSampled { sample }).await;
            }
            StationEvent::PeripheralFailed { device, message } => {
                notify(NoticeLevel::Error, &format!("{} 设备错误: {}", device, message));
                self.usage_workers.retain(|worker| !worker.is_finished());
            }
            StationEvent::OcrCompleted { text } => {
                self.dispatch(WorkflowEvent::OcrCompleted { text }).await;
            }
            StationEvent::OcrFailed { error } => {
                self.dispatch(WorkflowEvent::OcrFailed { error }).await;
            }
            StationEvent::Operator(command) => return self.handle_command(command).await,
            StationEvent::Shutdown => return Flow::Quit,
        }
        Flow::Continue
    }

    /// 把事件送入状态机，执行副作用直到没有后续事件
    pub async fn dispatch(&mut self, event: WorkflowEvent) {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            let state = std::mem::replace(&mut self.session.state, WorkflowState::Idle);
            let from = state.name();
            let step = transition(state, event);
            if step.next.name() != from {
                debug!("工作流状态: {} -> {}", from, step.next.name());
            }
            self.session.state = step.next;

            for effect in step.effects {
                if let Some(follow_up) = self.execute(effect).await {
                    pending.push_back(follow_up);
                }
            }
        }
    }

    async fn execute(&mut self, effect: Effect) -> Option<WorkflowEvent> {
        match effect {
            Effect::Notify { level, message } => {
                notify(level, &message);
                None
            }
            Effect::StartOcr => self.start_ocr().await,
            Effect::StopOcr => {
                if let Some(dispatcher) = self.ocr.take() {
                    dispatcher.stop(self.grace()).await;
                }
                None
            }
            Effect::StartUsageWorkers => {
                self.start_usage_workers().await;
                None
            }
            Effect::StopUsageWorkers => {
                self.stop_usage_workers().await;
                None
            }
            Effect::LookupCatalog { cas } => match self.storage.get_catalog().lookup(&cas).await {
                Ok(Some(entry)) => Some(WorkflowEvent::CatalogMatched {
                    cas,
                    fields: entry.to_fields(),
                }),
                Ok(None) => {
                    debug!("参考库中未找到 CAS 号 {}", cas);
                    None
                }
                Err(e) => {
                    notify(NoticeLevel::Warn, &format!("化学品参考库查询失败: {}", e));
                    None
                }
            },
            Effect::ResolveScan { scan, token } => {
                match resolve_scan(self.storage.get_repo().as_ref(), scan).await {
                    Ok(item) => Some(WorkflowEvent::ScanResolved { item, token }),
                    Err(e) => Some(WorkflowEvent::ScanFailed {
                        token,
                        reason: e.to_string(),
                    }),
                }
            }
            Effect::CreateRecord {
                fields,
                warehouse_id,
            } => match self.storage.get_repo().create_record(&fields, warehouse_id).await {
                Ok(product_id) => {
                    self.session.last_saved = Some(SavedEntry {
                        warehouse_id,
                        product_id,
                        position: fields
                            .get(columns::POSITION)
                            .filter(|v| !v.is_null())
                            .map(|v| v.to_string()),
                    });
                    Some(WorkflowEvent::EntryCreated { product_id })
                }
                Err(e) => Some(WorkflowEvent::StoreFailed { error: e.to_string() }),
            },
            Effect::AppendChangeLog { product_id, fields } => {
                match self.storage.get_repo().append_change_log(&fields, product_id).await {
                    Ok(log_id) => Some(WorkflowEvent::UsageAppended { log_id }),
                    Err(e) => Some(WorkflowEvent::StoreFailed { error: e.to_string() }),
                }
            }
            Effect::ShowReading { sample, remaining } => {
                debug!(
                    "电子秤读数: {}，剩余: {}",
                    sample,
                    remaining.map(|r| r.to_string()).unwrap_or_default()
                );
                self.session.last_reading = Some(Reading { sample, remaining });
                None
            }
        }
    }

    /// 把最新画面交给 OCR Actor，必要时先启动 Actor
    async fn start_ocr(&mut self) -> Option<WorkflowEvent> {
        let Some(frame) = self.session.latest_frame.as_ref().map(|f| f.image.clone()) else {
            return Some(WorkflowEvent::OcrFailed {
                error: ServiceError::Decode("没有可用的图像数据".to_string()),
            });
        };

        if !self.ocr.as_ref().is_some_and(|d| d.is_running()) {
            self.ocr = Some(OcrDispatcher::spawn(
                self.peripherals.get_ocr().clone(),
                self.config.ocr.jpeg_quality,
                self.bus.clone(),
            ));
        }

        let delivered = match &self.ocr {
            Some(dispatcher) => dispatcher.handle().recognize(frame).await,
            None => false,
        };
        if delivered {
            None
        } else {
            Some(WorkflowEvent::OcrFailed {
                error: ServiceError::Unreachable("OCR 任务已停止".to_string()),
            })
        }
    }

    /// 启动扫码枪和电子秤；单个设备失败不影响另一个
    ///
    /// 串口在各自的 worker 线程上打开，打开失败以 PeripheralFailed 报告
    async fn start_usage_workers(&mut self) {
        self.stop_usage_workers().await;

        let hub = self.peripherals.get_hub().clone();
        let scanner = self.config.scanner.clone();
        let (port, baud_rate) = (scanner.port.clone(), scanner.baud_rate);
        self.usage_workers.push(ScannerWorker::spawn(
            move || hub.open(DeviceKind::Scanner, &port, baud_rate),
            scanner,
            self.bus.clone(),
        ));

        self.start_scale_worker();
    }

    fn start_scale_worker(&mut self) {
        let scale = self.config.scale.clone();
        if scale.port.trim().is_empty() {
            notify(NoticeLevel::Warn, "电子秤串口未设置，请使用 scale 命令设置");
            return;
        }

        let hub = self.peripherals.get_hub().clone();
        let (port, baud_rate) = (scale.port.clone(), scale.baud_rate);
        self.usage_workers.push(ScaleWorker::spawn(
            move || hub.open(DeviceKind::Scale, &port, baud_rate),
            scale,
            self.bus.clone(),
        ));
    }

    async fn stop_usage_workers(&mut self) {
        let grace = self.grace();
        for worker in self.usage_workers.drain(..) {
            let name = worker.name();
            if !worker.shutdown(grace).await {
                warn!("{} 被强制停止", name);
            }
        }
    }

    /// 处理控制台命令
    pub async fn handle_command(&mut self, command: OperatorCommand) -> Flow {
        match command {
            OperatorCommand::Input => {
                let frame_available = self.session.latest_frame.is_some();
                self.dispatch(WorkflowEvent::InputRequested { frame_available }).await;
            }
            OperatorCommand::Use => self.dispatch(WorkflowEvent::UseRequested).await,
            OperatorCommand::Save => {
                let warehouse_id = self.session.warehouse_id;
                self.dispatch(WorkflowEvent::SaveRequested { warehouse_id }).await;
            }
            OperatorCommand::Print => self.print_label().await,
            OperatorCommand::Set { field, value } => {
                self.dispatch(WorkflowEvent::FieldEdited { key: field, value }).await;
            }
            OperatorCommand::Warehouse(id) => self.change_warehouse(id).await,
            OperatorCommand::Scale { port, baud_rate } => self.configure_scale(port, baud_rate).await,
            OperatorCommand::Scan(token) => self.dispatch(WorkflowEvent::ScanReceived { token }).await,
            OperatorCommand::Weigh(sample) => self.dispatch(WorkflowEvent::WeightSampled { sample }).await,
            OperatorCommand::Export { kind, path } => {
                match export_csv(self.storage.get_repo().as_ref(), kind, &path).await {
                    Ok(count) => notify(
                        NoticeLevel::Info,
                        &format!("导出完成: {} 行 -> {}", count, path.display()),
                    ),
                    Err(e) => notify(NoticeLevel::Error, &format!("导出失败: {}", e)),
                }
            }
            OperatorCommand::WifiList => {
                let networks = self.storage.get_credentials().list().await;
                if networks.is_empty() {
                    notify(NoticeLevel::Info, "没有保存的网络");
                } else {
                    notify(NoticeLevel::Info, &format!("已保存的网络: {}", networks.join(", ")));
                }
            }
            OperatorCommand::WifiSet { network, secret } => {
                match self.storage.get_credentials().upsert(&network, &secret).await {
                    Ok(()) => notify(NoticeLevel::Info, &format!("已保存网络 {} 的密码", network)),
                    Err(e) => notify(NoticeLevel::Error, &format!("保存网络凭据失败: {}", e)),
                }
            }
            OperatorCommand::WifiRemove(network) => {
                match self.storage.get_credentials().remove(&network).await {
                    Ok(true) => notify(NoticeLevel::Info, &format!("已删除网络 {}", network)),
                    Ok(false) => notify(NoticeLevel::Warn, &format!("没有保存网络 {}", network)),
                    Err(e) => notify(NoticeLevel::Error, &format!("删除网络凭据失败: {}", e)),
                }
            }
            OperatorCommand::Status => notify(NoticeLevel::Info, &self.session.status_line()),
            OperatorCommand::Help => {
                for line in HELP_TEXT.lines() {
                    notify(NoticeLevel::Info, line);
                }
            }
            OperatorCommand::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    /// 打印最近一次录入的二维码标签
    ///
    /// 打印成功后清空已保存的录入，下一张标签需要重新录入
    pub async fn print_label(&mut self) {
        if self.session.state.in_usage_mode() {
            notify(NoticeLevel::Warn, "使用模式下不能打印标签，请先完成录入");
            return;
        }
        let Some(entry) = self.session.last_saved.clone() else {
            notify(NoticeLevel::Warn, "请先录入并保存后再打印标签");
            return;
        };

        let printer = LabelPrinter::new(self.peripherals.get_hub().clone(), self.config.printer.clone());
        let content = entry.label_content();
        let caption = entry.label_caption();

        let result = tokio::task::spawn_blocking(move || printer.print(&content, &caption)).await;
        match result {
            Ok(Ok(())) => {
                self.session.last_saved = None;
                notify(NoticeLevel::Info, &format!("标签已发送到打印机: {}", entry.label_content()));
            }
            Ok(Err(e)) => notify(NoticeLevel::Error, &format!("打印失败: {}", e)),
            Err(e) => notify(NoticeLevel::Error, &format!("打印任务失败: {}", e)),
        }
    }

    async fn change_warehouse(&mut self, id: i64) {
        if let Err(e) = validate_warehouse_id(id) {
            notify(NoticeLevel::Warn, &e);
            return;
        }

        self.session.warehouse_id = id;
        let update = StationConfigUpdate {
            warehouse_id: Some(id),
            ..StationConfigUpdate::default()
        };
        match self.storage.get_settings().update(update).await {
            Ok(config) => {
                self.config = config;
                notify(NoticeLevel::Info, &format!("仓库编号已切换为 {}", id));
            }
            Err(e) => notify(NoticeLevel::Error, &format!("仓库编号保存失败: {}", e)),
        }
    }

    /// 修改电子秤串口；使用模式下立即用新设置重启电子秤
    async fn configure_scale(&mut self, port: String, baud_rate: Option<u32>) {
        let scale = ScaleSettings {
            port,
            baud_rate: baud_rate.unwrap_or(self.config.scale.baud_rate),
            ..self.config.scale.clone()
        };
        let update = StationConfigUpdate {
            scale: Some(scale),
            ..StationConfigUpdate::default()
        };

        match self.storage.get_settings().update(update).await {
            Ok(config) => {
                self.config = config;
                notify(
                    NoticeLevel::Info,
                    &format!("串口设置成功: {} @ {}", self.config.scale.port, self.config.scale.baud_rate),
                );
            }
            Err(e) => {
                notify(NoticeLevel::Error, &format!("串口设置保存失败: {}", e));
                return;
            }
        }

        if self.session.state.in_usage_mode() {
            self.start_usage_workers().await;
        }
    }
}
