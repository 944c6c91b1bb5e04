// 工作流状态机 - 录入 / 使用两条流程的显式状态
//
// transition 是纯函数：给定当前状态和事件，返回下一状态以及需要执行的副作用，
// 所有 I/O 由控制器执行后再以事件形式送回

use super::scan::{ResolvedItem, ScanIdentifier};
use crate::error::ServiceError;
use crate::extraction::extract_label;
use crate::peripherals::WeightSample;
use crate::storage::{columns, FieldMap, FieldValue};

/// 录入流程的提示：尚未识别
pub const MSG_RECOGNIZE_FIRST: &str = "请先点击录入按钮进行内容识别";
/// 使用流程的提示：一次使用已保存，需要重新扫码
pub const MSG_SCAN_AGAIN: &str = "请点击使用按钮再次识别同一二维码或放入新的二维码识别";
/// 使用流程的提示：还没有电子秤读数
pub const MSG_WAIT_FOR_WEIGHT: &str = "尚未收到电子秤读数，请将试剂放上电子秤";

/// 工作流状态
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowState {
    /// 空闲
    Idle,
    /// 已提交 OCR，等待结果
    AwaitingRecognition,
    /// OCR 结果已暂存，可编辑后保存
    ReadyToSaveEntry { staged: FieldMap },
    /// 使用模式，等待扫码
    AwaitingScan { last_token: Option<String> },
    /// 已定位容器，等待电子秤读数
    AwaitingReconciliation { item: ResolvedItem, token: String },
    /// 已有读数和剩余量，可以保存使用记录
    ReadyToSaveUsage {
        item: ResolvedItem,
        token: String,
        sample: WeightSample,
        remaining: WeightSample,
    },
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "空闲",
            Self::AwaitingRecognition => "识别中",
            Self::ReadyToSaveEntry { .. } => "录入待保存",
            Self::AwaitingScan { .. } => "等待扫码",
            Self::AwaitingReconciliation { .. } => "等待称重",
            Self::ReadyToSaveUsage { .. } => "使用待保存",
        }
    }

    /// 是否处于使用模式
    pub fn in_usage_mode(&self) -> bool {
        matches!(
            self,
            Self::AwaitingScan { .. } | Self::AwaitingReconciliation { .. } | Self::ReadyToSaveUsage { .. }
        )
    }
}

/// 送入状态机的事件
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    /// 录入按钮
    InputRequested { frame_available: bool },
    /// 使用按钮
    UseRequested,
    /// 保存按钮
    SaveRequested { warehouse_id: i64 },
    /// 操作员修改录入字段
    FieldEdited { key: String, value: String },
    OcrCompleted { text: String },
    OcrFailed { error: ServiceError },
    ScanReceived { token: String },
    WeightSampled { sample: WeightSample },
    /// 参考库查到 CAS 号对应的信息
    CatalogMatched { cas: String, fields: FieldMap },
    ScanResolved { item: ResolvedItem, token: String },
    ScanFailed { token: String, reason: String },
    EntryCreated { product_id: i64 },
    UsageAppended { log_id: i64 },
    StoreFailed { error: String },
}

/// 操作员提示级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

/// 需要控制器执行的副作用
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// 向操作员输出提示
    Notify { level: NoticeLevel, message: String },
    /// 把最新画面交给 OCR
    StartOcr,
    StopOcr,
    /// 启动扫码枪与电子秤
    StartUsageWorkers,
    StopUsageWorkers,
    LookupCatalog { cas: String },
    ResolveScan { scan: ScanIdentifier, token: String },
    CreateRecord { fields: FieldMap, warehouse_id: i64 },
    AppendChangeLog { product_id: i64, fields: FieldMap },
    /// 更新显示的读数
    ShowReading {
        sample: WeightSample,
        remaining: Option<WeightSample>,
    },
}

fn info(message: impl Into<String>) -> Effect {
    Effect::Notify {
        level: NoticeLevel::Info,
        message: message.into(),
    }
}

fn warn(message: impl Into<String>) -> Effect {
    Effect::Notify {
        level: NoticeLevel::Warn,
        message: message.into(),
    }
}

fn error(message: impl Into<String>) -> Effect {
    Effect::Notify {
        level: NoticeLevel::Error,
        message: message.into(),
    }
}

/// 一次状态转换的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: WorkflowState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: WorkflowState) -> Self {
        Self {
            next,
            effects: Vec::new(),
        }
    }

    fn with(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// 状态转换
pub fn transition(state: WorkflowState, event: WorkflowEvent) -> Transition {
    use WorkflowEvent as E;
    use WorkflowState as S;

    match (state, event) {
        // ---- 录入 ----
        (_, E::InputRequested { frame_available: true }) => Transition::to(S::AwaitingRecognition)
            .with(Effect::StopUsageWorkers)
            .with(Effect::StartOcr)
            .with(info("正在识别，请稍候")),

        (state, E::InputRequested { frame_available: false }) => {
            let next = match state {
                staged @ S::ReadyToSaveEntry { .. } => staged,
                _ => S::Idle,
            };
            Transition::to(next)
                .with(Effect::StopUsageWorkers)
                .with(error("错误：没有可用的图像数据"))
        }

        (S::AwaitingRecognition, E::OcrCompleted { text }) => {
            let staged = extract_label(&text);
            let cas = staged
                .get(columns::CAS)
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let message = format!("识别完成，提取到 {} 个字段", staged.len());

            let transition = Transition::to(S::ReadyToSaveEntry { staged }).with(info(message));
            match cas {
                Some(cas) => transition.with(Effect::LookupCatalog { cas }),
                None => transition,
            }
        }

        (S::AwaitingRecognition, E::OcrFailed { error: err }) => Transition::to(S::Idle)
            .with(Effect::StopOcr)
            .with(error(err.to_string())),

        (S::ReadyToSaveEntry { mut staged }, E::FieldEdited { key, value }) => {
            let value = value.trim().to_string();
            let lookup = key == columns::CAS && !value.is_empty();
            if value.is_empty() {
                staged.insert(key.clone(), FieldValue::Null);
            } else {
                staged.insert(key.clone(), FieldValue::Text(value.clone()));
            }

            let mut transition =
                Transition::to(S::ReadyToSaveEntry { staged }).with(info(format!("{} 已更新", key)));
            if lookup {
                transition = transition.with(Effect::LookupCatalog { cas: value });
            }
            transition
        }

        (S::ReadyToSaveEntry { mut staged }, E::CatalogMatched { cas, fields }) => {
            let current = staged.get(columns::CAS).and_then(|v| v.as_str());
            if current != Some(cas.as_str()) {
                // CAS 号已被改掉，查询结果过期
                return Transition::to(S::ReadyToSaveEntry { staged });
            }
            staged.extend(fields);
            Transition::to(S::ReadyToSaveEntry { staged })
                .with(info(format!("已根据 CAS 号 {} 补全化学品信息", cas)))
        }

        (S::ReadyToSaveEntry { staged }, E::SaveRequested { warehouse_id }) => {
            let fields = staged.clone();
            Transition::to(S::ReadyToSaveEntry { staged })
                .with(Effect::CreateRecord {
                    fields,
                    warehouse_id,
                })
        }

        (S::ReadyToSaveEntry { .. }, E::EntryCreated { product_id }) => {
            Transition::to(S::Idle).with(info(format!("保存成功，产品编号 {}", product_id)))
        }

        (state @ (S::Idle | S::AwaitingRecognition), E::SaveRequested { .. }) => {
            Transition::to(state).with(warn(MSG_RECOGNIZE_FIRST))
        }

        (state, E::FieldEdited { .. }) => Transition::to(state).with(warn(MSG_RECOGNIZE_FIRST)),

        // ---- 使用 ----
        (_, E::UseRequested) => Transition::to(S::AwaitingScan { last_token: None })
            .with(Effect::StopOcr)
            .with(Effect::StartUsageWorkers)
            .with(info("使用模式已开启，请扫描试剂二维码")),

        (S::AwaitingScan { last_token }, E::ScanReceived { token }) => {
            if last_token.as_deref() == Some(token.as_str()) {
                return Transition::to(S::AwaitingScan { last_token });
            }
            let state = S::AwaitingScan { last_token };
            match ScanIdentifier::parse(&token) {
                Ok(scan) => Transition::to(state)
                    .with(info(format!("获取到二维码结果: {}", token)))
                    .with(Effect::ResolveScan { scan, token }),
                Err(err) => Transition::to(state).with(warn(err.to_string())),
            }
        }

        (S::AwaitingScan { .. }, E::ScanResolved { item, token }) => {
            let summary = item.summary();
            Transition::to(S::AwaitingReconciliation { item, token })
                .with(info(format!("成功获取记录: {}", summary)))
        }

        (state @ S::AwaitingScan { .. }, E::ScanFailed { reason, .. }) => {
            Transition::to(state).with(error(reason))
        }

        (S::AwaitingReconciliation { item, token } | S::ReadyToSaveUsage { item, token, .. }, E::WeightSampled { sample }) => {
            let remaining = sample.remaining_from(item.baseline);
            Transition::to(S::ReadyToSaveUsage {
                item,
                token,
                sample,
                remaining,
            })
            .with(Effect::ShowReading {
                sample,
                remaining: Some(remaining),
            })
        }

        (state, E::WeightSampled { sample }) => Transition::to(state).with(Effect::ShowReading {
            sample,
            remaining: None,
        }),

        (state @ S::AwaitingScan { .. }, E::SaveRequested { .. }) => {
            Transition::to(state).with(warn(MSG_SCAN_AGAIN))
        }

        (state @ S::AwaitingReconciliation { .. }, E::SaveRequested { .. }) => {
            Transition::to(state).with(warn(MSG_WAIT_FOR_WEIGHT))
        }

        (
            S::ReadyToSaveUsage {
                item,
                token,
                sample,
                remaining,
            },
            E::SaveRequested { .. },
        ) => {
            let product_id = item.product_id();
            let fields = item.usage_fields(sample.value, remaining.value);
            Transition::to(S::ReadyToSaveUsage {
                item,
                token,
                sample,
                remaining,
            })
            .with(Effect::AppendChangeLog { product_id, fields })
        }

        (S::ReadyToSaveUsage { token, remaining, .. }, E::UsageAppended { log_id }) => {
            Transition::to(S::AwaitingScan {
                last_token: Some(token),
            })
            .with(info(format!("保存成功，记录编号 {}，剩余 {}", log_id, remaining)))
        }

        // ---- 通用 ----
        (state, E::StoreFailed { error: err }) => {
            Transition::to(state).with(error(format!("保存失败: {}", err)))
        }

        (state, E::OcrFailed { error: err }) => {
            // 识别已被放弃，迟到的失败只记录
            Transition::to(state).with(warn(err.to_string()))
        }

        // 迟到的 OCR 结果、使用中重复的扫码等其他组合一律忽略
        (state, _) => Transition::to(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::scan::ResolvedFrom;
    use pretty_assertions::assert_eq;

    fn item(baseline: f64) -> ResolvedItem {
        let mut fields = FieldMap::new();
        fields.insert(columns::NAME.to_string(), FieldValue::text("Lysine"));
        ResolvedItem {
            scan: ScanIdentifier {
                warehouse_id: 1,
                product_id: 12,
            },
            baseline,
            fields,
            source: ResolvedFrom::Record,
        }
    }

    fn notices(t: &Transition) -> Vec<(NoticeLevel, String)> {
        t.effects
            .iter()
            .filter_map(|e| match e {
                Effect::Notify { level, message } => Some((*level, message.clone())),
                _ => None,
            })
            .collect()
    }

    fn has_store_effect(t: &Transition) -> bool {
        t.effects
            .iter()
            .any(|e| matches!(e, Effect::CreateRecord { .. } | Effect::AppendChangeLog { .. }))
    }

    #[test]
    fn test_save_without_recognition_is_rejected() {
        for state in [WorkflowState::Idle, WorkflowState::AwaitingRecognition] {
            let t = transition(state.clone(), WorkflowEvent::SaveRequested { warehouse_id: 1 });
            assert_eq!(t.next, state);
            assert!(!has_store_effect(&t));
            assert_eq!(notices(&t), vec![(NoticeLevel::Warn, MSG_RECOGNIZE_FIRST.to_string())]);
        }
    }

    #[test]
    fn test_input_flow_stages_extracted_fields() {
        let t = transition(WorkflowState::Idle, WorkflowEvent::InputRequested { frame_available: true });
        assert_eq!(t.next, WorkflowState::AwaitingRecognition);
        assert!(t.effects.contains(&Effect::StartOcr));
        assert!(t.effects.contains(&Effect::StopUsageWorkers));

        let t = transition(
            t.next,
            WorkflowEvent::OcrCompleted {
                text: "CAS 56-87-1 lot A12345 25g 99%".to_string(),
            },
        );
        let WorkflowState::ReadyToSaveEntry { staged } = &t.next else {
            panic!("unexpected state {:?}", t.next);
        };
        assert_eq!(staged.get(columns::CAS), Some(&FieldValue::text("56-87-1")));
        assert!(t.effects.contains(&Effect::LookupCatalog { cas: "56-87-1".to_string() }));

        let t = transition(t.next, WorkflowEvent::SaveRequested { warehouse_id: 3 });
        assert!(matches!(t.next, WorkflowState::ReadyToSaveEntry { .. }));
        assert!(matches!(
            t.effects.as_slice(),
            [Effect::CreateRecord { warehouse_id: 3, .. }]
        ));

        let t = transition(t.next, WorkflowEvent::EntryCreated { product_id: 9 });
        assert_eq!(t.next, WorkflowState::Idle);
    }

    #[test]
    fn test_input_without_frame_reports_error() {
        let t = transition(WorkflowState::Idle, WorkflowEvent::InputRequested { frame_available: false });
        assert_eq!(t.next, WorkflowState::Idle);
        assert_eq!(notices(&t)[0].0, NoticeLevel::Error);
        assert!(!t.effects.contains(&Effect::StartOcr));
    }

    #[test]
    fn test_ocr_failure_returns_to_idle() {
        let t = transition(
            WorkflowState::AwaitingRecognition,
            WorkflowEvent::OcrFailed {
                error: ServiceError::Unreachable("refused".to_string()),
            },
        );
        assert_eq!(t.next, WorkflowState::Idle);
        assert!(t.effects.contains(&Effect::StopOcr));
    }

    #[test]
    fn test_late_ocr_result_is_ignored_in_usage_mode() {
        let state = WorkflowState::AwaitingScan { last_token: None };
        let t = transition(state.clone(), WorkflowEvent::OcrCompleted { text: "CAS 1-11-1".into() });
        assert_eq!(t.next, state);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_catalog_match_merges_only_for_current_cas() {
        let mut staged = FieldMap::new();
        staged.insert(columns::CAS.to_string(), FieldValue::text("56-87-1"));
        let mut found = FieldMap::new();
        found.insert(columns::NAME.to_string(), FieldValue::text("Lysine"));

        let t = transition(
            WorkflowState::ReadyToSaveEntry { staged: staged.clone() },
            WorkflowEvent::CatalogMatched {
                cas: "56-87-1".to_string(),
                fields: found.clone(),
            },
        );
        let WorkflowState::ReadyToSaveEntry { staged: merged } = t.next else {
            panic!("unexpected state");
        };
        assert_eq!(merged.get(columns::NAME), Some(&FieldValue::text("Lysine")));

        let t = transition(
            WorkflowState::ReadyToSaveEntry { staged: staged.clone() },
            WorkflowEvent::CatalogMatched {
                cas: "64-17-5".to_string(),
                fields: found,
            },
        );
        assert_eq!(t.next, WorkflowState::ReadyToSaveEntry { staged });
    }

    #[test]
    fn test_field_edit_of_cas_triggers_lookup() {
        let t = transition(
            WorkflowState::ReadyToSaveEntry { staged: FieldMap::new() },
            WorkflowEvent::FieldEdited {
                key: columns::CAS.to_string(),
                value: " 64-17-5 ".to_string(),
            },
        );
        assert!(t.effects.contains(&Effect::LookupCatalog { cas: "64-17-5".to_string() }));

        let t = transition(
            WorkflowState::Idle,
            WorkflowEvent::FieldEdited {
                key: columns::LOT.to_string(),
                value: "A12345".to_string(),
            },
        );
        assert_eq!(t.next, WorkflowState::Idle);
    }

    #[test]
    fn test_usage_flow_and_save_in_use_rejection() {
        let t = transition(WorkflowState::ReadyToSaveEntry { staged: FieldMap::new() }, WorkflowEvent::UseRequested);
        assert_eq!(t.next, WorkflowState::AwaitingScan { last_token: None });
        assert!(t.effects.contains(&Effect::StartUsageWorkers));
        assert!(t.effects.contains(&Effect::StopOcr));

        let t = transition(t.next, WorkflowEvent::ScanReceived { token: "1:12".into() });
        assert!(matches!(
            t.effects.last(),
            Some(Effect::ResolveScan { scan: ScanIdentifier { warehouse_id: 1, product_id: 12 }, .. })
        ));

        let t = transition(
            t.next,
            WorkflowEvent::ScanResolved {
                item: item(100.0),
                token: "1:12".into(),
            },
        );
        assert!(matches!(t.next, WorkflowState::AwaitingReconciliation { .. }));

        // 没有读数不能保存
        let t = transition(t.next, WorkflowEvent::SaveRequested { warehouse_id: 1 });
        assert!(!has_store_effect(&t));
        assert_eq!(notices(&t)[0].1, MSG_WAIT_FOR_WEIGHT);

        let t = transition(t.next, WorkflowEvent::WeightSampled { sample: WeightSample::new(20.5, 1) });
        let WorkflowState::ReadyToSaveUsage { remaining, .. } = &t.next else {
            panic!("unexpected state {:?}", t.next);
        };
        assert_eq!(remaining.to_string(), "79.5");

        // 使用中再次扫码被忽略
        let before = t.next.clone();
        let t = transition(t.next, WorkflowEvent::ScanReceived { token: "1:13".into() });
        assert_eq!(t.next, before);

        let t = transition(t.next, WorkflowEvent::SaveRequested { warehouse_id: 1 });
        let Some(Effect::AppendChangeLog { product_id, fields }) = t.effects.last() else {
            panic!("expected append effect");
        };
        assert_eq!(*product_id, 12);
        assert_eq!(fields.get(columns::USAGE), Some(&FieldValue::Real(20.5)));
        assert_eq!(fields.get(columns::NET_CONTENT), Some(&FieldValue::Real(79.5)));

        let t = transition(t.next, WorkflowEvent::UsageAppended { log_id: 4 });
        assert_eq!(
            t.next,
            WorkflowState::AwaitingScan {
                last_token: Some("1:12".into())
            }
        );

        // 保存后再次保存需要重新扫码
        let t = transition(t.next, WorkflowEvent::SaveRequested { warehouse_id: 1 });
        assert!(!has_store_effect(&t));
        assert_eq!(notices(&t), vec![(NoticeLevel::Warn, MSG_SCAN_AGAIN.to_string())]);

        // 同一二维码仍在扫码枪前时不会重复触发
        let t = transition(t.next, WorkflowEvent::ScanReceived { token: "1:12".into() });
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_invalid_scan_and_not_found_stay_waiting() {
        let state = WorkflowState::AwaitingScan { last_token: None };
        let t = transition(state.clone(), WorkflowEvent::ScanReceived { token: "hello".into() });
        assert_eq!(t.next, state);
        assert_eq!(notices(&t)[0].0, NoticeLevel::Warn);

        let t = transition(
            state.clone(),
            WorkflowEvent::ScanFailed {
                token: "1:99".into(),
                reason: "未找到".into(),
            },
        );
        assert_eq!(t.next, state);
        assert_eq!(notices(&t)[0].0, NoticeLevel::Error);
    }

    #[test]
    fn test_store_failure_keeps_state() {
        let state = WorkflowState::ReadyToSaveEntry { staged: FieldMap::new() };
        let t = transition(state.clone(), WorkflowEvent::StoreFailed { error: "disk full".into() });
        assert_eq!(t.next, state);
        assert_eq!(notices(&t)[0].0, NoticeLevel::Error);
    }
}
