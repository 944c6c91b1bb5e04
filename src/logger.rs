// 自定义日志层 - 把面向操作员的日志推送到控制台

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// 面向操作员的日志目标，`info!(target: "operator", ...)`
pub const OPERATOR_TARGET: &str = "operator";

/// 日志消息
#[derive(Clone, Debug, serde::Serialize)]
pub struct LogMessage {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// 操作员控制台 - 保留最近的操作日志并广播给订阅者
pub struct OperatorConsole {
    sender: broadcast::Sender<LogMessage>,
    history: RwLock<VecDeque<LogMessage>>,
    capacity: usize,
}

impl OperatorConsole {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            history: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// 订阅新日志
    pub fn subscribe(&self) -> broadcast::Receiver<LogMessage> {
        self.sender.subscribe()
    }

    /// 最近的 n 条日志（旧的在前）
    pub fn recent(&self, n: usize) -> Vec<LogMessage> {
        match self.history.read() {
            Ok(history) => {
                let skip = history.len().saturating_sub(n);
                history.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    fn push(&self, log: LogMessage) {
        if let Ok(mut history) = self.history.write() {
            if history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(log.clone());
        }
        // 没有订阅者时丢弃
        let _ = self.sender.send(log);
    }
}

/// 自定义日志层，只转发 target 为 operator 的事件
pub struct OperatorLogLayer {
    console: Arc<OperatorConsole>,
}

impl OperatorLogLayer {
    pub fn new(console: Arc<OperatorConsole>) -> Self {
        Self { console }
    }
}

impl<S: Subscriber> Layer<S> for OperatorLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target() != OPERATOR_TARGET {
            return;
        }

        // 使用 visitor 提取消息
        struct MessageVisitor {
            message: String,
        }

        impl tracing::field::Visit for MessageVisitor {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = value.to_string();
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.message = format!("{:?}", value);
                }
            }
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let log = LogMessage {
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor.message,
        };

        self.console.push(log);
    }
}

/// 初始化日志系统（带操作员控制台）
///
/// 日志按天轮转写入 `log_dir`；`echo_stdout` 为 true 时同时输出到标准输出
pub fn init_with_console(
    console: Arc<OperatorConsole>,
    log_dir: &Path,
    echo_stdout: bool,
) -> anyhow::Result<WorkerGuard> {
    use tracing_subscriber::fmt::time::LocalTime;
    use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

    std::fs::create_dir_all(log_dir)?;

    // 配置日志输出到文件（每天轮转）
    let file_appender = tracing_appender::rolling::daily(log_dir, "station.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let writer = if echo_stdout {
        BoxMakeWriter::new(std::io::stdout.and(non_blocking))
    } else {
        BoxMakeWriter::new(non_blocking)
    };

    // 使用本地时区
    let timer = LocalTime::new(time::format_description::parse(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]",
    )?);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(writer)
        .with_timer(timer)
        .with_ansi(echo_stdout && cfg!(debug_assertions))
        .finish()
        .with(OperatorLogLayer::new(console));

    tracing::subscriber::set_global_default(subscriber)?;

    eprintln!("日志文件位置: {:?}", log_dir);
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::prelude::*;

    #[test]
    fn test_only_operator_events_are_forwarded() {
        let console = Arc::new(OperatorConsole::new(8));
        let subscriber = tracing_subscriber::registry().with(OperatorLogLayer::new(console.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("内部日志");
            tracing::warn!(target: "operator", "请先点击录入按钮进行内容识别");
            tracing::info!(target: "operator", "保存成功，产品编号 {}", 7);
        });

        let recent = console.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].level, "WARN");
        assert_eq!(recent[0].message, "请先点击录入按钮进行内容识别");
        assert_eq!(recent[1].message, "保存成功，产品编号 7");
    }

    #[test]
    fn test_console_history_is_bounded() {
        let console = OperatorConsole::new(2);
        let mut receiver = console.subscribe();
        for i in 0..3 {
            console.push(LogMessage {
                timestamp: String::new(),
                level: "INFO".to_string(),
                target: OPERATOR_TARGET.to_string(),
                message: i.to_string(),
            });
        }

        let messages: Vec<String> = console.recent(10).into_iter().map(|m| m.message).collect();
        assert_eq!(messages, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(console.recent(1)[0].message, "2");
        // 广播通道容量为 2，最早的一条被挤掉
        assert!(receiver.try_recv().is_err());
    }
}
