//! OCR 文本字段提取
//!
//! OCR 输出是带噪声的自由文本，每个提取函数互相独立，
//! 找不到时返回未找到标记而不是报错，由操作员手工补全缺失字段。

use crate::storage::{columns, FieldMap, FieldValue};
use regex::Regex;
use std::sync::LazyLock;

/// CAS 号：2-7 位数字、2 位数字、1 位校验位
static CAS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{2,7}-\d{2}-\d)\b").expect("CAS 正则无效"));

static LOT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:批次号|批号|次号|批|LOT|lot)\s*[:：]?\s*([A-Za-z0-9]{5,15})")
        .expect("批号正则无效")
});

static WEIGHT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)(kg|mg|g|lb|oz)\b").expect("重量正则无效")
});

static PURITY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)%").expect("纯度正则无效"));

/// CAS 号的关键字（大小写不敏感）
const CAS_KEYWORD: &str = "cas";

/// 单个字段的提取结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub value: String,
    pub found: bool,
}

impl Extraction {
    fn found(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            found: true,
        }
    }

    fn missing() -> Self {
        Self {
            value: String::new(),
            found: false,
        }
    }

    /// 找到时返回值
    pub fn into_option(self) -> Option<String> {
        self.found.then_some(self.value)
    }
}

/// 提取 CAS 号
///
/// 先定位第一个 "cas" 关键字，再在其后的文本中匹配 CAS 号格式
pub fn extract_identifier(text: &str) -> Extraction {
    let Some(start) = find_ascii_case_insensitive(text, CAS_KEYWORD) else {
        return Extraction::missing();
    };

    let rest = &text[start + CAS_KEYWORD.len()..];
    match CAS_PATTERN.captures(rest) {
        Some(caps) => Extraction::found(&caps[1]),
        None => Extraction::missing(),
    }
}

/// 提取批号：关键字后紧跟的 5-15 位字母数字
pub fn extract_lot_number(text: &str) -> Extraction {
    match LOT_PATTERN.captures(text) {
        Some(caps) => Extraction::found(&caps[1]),
        None => Extraction::missing(),
    }
}

/// 提取第一个带单位的重量，例如 `12.5kg`
pub fn extract_weight(text: &str) -> Extraction {
    let Some(caps) = WEIGHT_PATTERN.captures(text) else {
        return Extraction::missing();
    };

    let Ok(number) = caps[1].parse::<f64>() else {
        return Extraction::missing();
    };
    Extraction::found(format!(
        "{}{}",
        format_float(number),
        caps[2].to_ascii_lowercase()
    ))
}

/// 提取第一个百分比纯度，例如 `99.9%`
pub fn extract_purity(text: &str) -> Extraction {
    match PURITY_PATTERN.captures(text) {
        Some(caps) => Extraction::found(format!("{}%", &caps[1])),
        None => Extraction::missing(),
    }
}

/// 把 `12.5kg` 拆成数值和单位
pub fn parse_quantity(value: &str) -> Option<(f64, String)> {
    let caps = WEIGHT_PATTERN.captures(value.trim())?;
    let number = caps[1].parse::<f64>().ok()?;
    Some((number, caps[2].to_ascii_lowercase()))
}

/// 对整段 OCR 文本运行全部提取器，生成录入暂存字段
///
/// 净含量拆成数值（净含量）和单位（单位）两列
pub fn extract_label(text: &str) -> FieldMap {
    let mut staged = FieldMap::new();

    if let Some(cas) = extract_identifier(text).into_option() {
        staged.insert(columns::CAS.to_string(), FieldValue::Text(cas));
    }
    if let Some(lot) = extract_lot_number(text).into_option() {
        staged.insert(columns::LOT.to_string(), FieldValue::Text(lot));
    }
    if let Some(weight) = extract_weight(text).into_option() {
        if let Some((number, unit)) = parse_quantity(&weight) {
            staged.insert(columns::NET_CONTENT.to_string(), FieldValue::Real(number));
            staged.insert(columns::UNIT.to_string(), FieldValue::Text(unit));
        }
    }
    if let Some(purity) = extract_purity(text).into_option() {
        staged.insert(columns::PURITY.to_string(), FieldValue::Text(purity));
    }

    staged
}

/// 浮点数按 "至少一位小数" 的形式输出：10 -> "10.0"，12.5 -> "12.5"
fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// ASCII 大小写不敏感查找，返回字节偏移
fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}
