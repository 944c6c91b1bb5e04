// 数据模型模块 - 工作站配置结构

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// OCR 服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// 识别接口地址
    pub url: String,
    /// 请求超时（秒）
    pub timeout_secs: u64,
    /// 上传前 JPEG 编码质量(1-100)
    pub jpeg_quality: u8,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:1224/api/ocr".to_string(),
            timeout_secs: 5,
            jpeg_quality: 90,
        }
    }
}

/// 摄像头配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// 外部采集程序写出的快照文件
    pub snapshot_path: Option<PathBuf>,
    /// 轮询间隔（毫秒）
    pub poll_interval_ms: u64,
}

/// 扫码枪配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    pub port: String,
    pub baud_rate: u32,
    /// 触发指令发送间隔（毫秒）
    pub trigger_interval_ms: u64,
    /// 需要丢弃的噪声帧（十六进制）
    pub noise_sentinels: Vec<String>,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115200,
            trigger_interval_ms: 1000,
            noise_sentinels: vec!["02000001003331".to_string()],
        }
    }
}

/// 电子秤配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleSettings {
    /// 为空表示尚未设置串口
    pub port: String,
    pub baud_rate: u32,
    /// 原始读数右移的小数位数
    pub decimal_shift: u32,
    /// 读数间隔（毫秒）
    pub poll_interval_ms: u64,
}

impl Default for ScaleSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 9600,
            decimal_shift: 1,
            poll_interval_ms: 1000,
        }
    }
}

/// 标签打印机配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterSettings {
    pub port: String,
    pub baud_rate: u32,
}

impl Default for PrinterSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA0".to_string(),
            baud_rate: 9600,
        }
    }
}

/// 持久化的工作站配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedStationConfig {
    /// 当前仓库编号
    pub warehouse_id: i64,
    /// 记录库路径，为空时使用数据目录下的 reagent.db
    pub database_path: Option<PathBuf>,
    /// 化学品参考库路径，为空时使用数据目录下的 chemicals.db
    pub catalog_path: Option<PathBuf>,
    pub ocr: OcrSettings,
    pub camera: CameraSettings,
    pub scanner: ScannerSettings,
    pub scale: ScaleSettings,
    pub printer: PrinterSettings,
    /// 切换模式时等待 worker 退出的时间（毫秒）
    pub worker_join_timeout_ms: u64,
    /// 录入保存前必须填写的字段，默认不要求（识别结果不完整也可保存）
    pub required_fields: Vec<String>,
}

impl Default for PersistedStationConfig {
    fn default() -> Self {
        Self {
            warehouse_id: 1,
            database_path: None,
            catalog_path: None,
            ocr: OcrSettings::default(),
            camera: CameraSettings {
                snapshot_path: None,
                poll_interval_ms: 500,
            },
            scanner: ScannerSettings::default(),
            scale: ScaleSettings::default(),
            printer: PrinterSettings::default(),
            worker_join_timeout_ms: 1000,
            required_fields: Vec::new(),
        }
    }
}

/// 配置更新，只修改给出的字段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationConfigUpdate {
    pub warehouse_id: Option<i64>,
    pub ocr: Option<OcrSettings>,
    pub camera: Option<CameraSettings>,
    pub scanner: Option<ScannerSettings>,
    pub scale: Option<ScaleSettings>,
    pub printer: Option<PrinterSettings>,
    pub worker_join_timeout_ms: Option<u64>,
    pub required_fields: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{"warehouse_id": 3, "scale": {"port": "/dev/ttyUSB0"}}"#;
        let config: PersistedStationConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.warehouse_id, 3);
        assert_eq!(config.scale.port, "/dev/ttyUSB0");
        assert_eq!(config.scale.baud_rate, 9600);
        assert_eq!(config.scale.decimal_shift, 1);
        assert_eq!(config.ocr.timeout_secs, 5);
        assert_eq!(config.worker_join_timeout_ms, 1000);
        assert!(config.required_fields.is_empty());
    }
}
