// 错误类型定义 - 工作站统一错误分类
//
// 领域操作返回 StationError；启动流程、配置文件等外围逻辑仍使用 anyhow

use thiserror::Error;

/// OCR 服务错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// 请求超时
    #[error("OCR服务响应超时，请检查服务是否正常运行 ({0}s)")]
    Timeout(u64),

    /// 无法建立连接
    #[error("无法连接到OCR服务，请检查服务是否已启动: {0}")]
    Unreachable(String),

    /// 非 2xx 响应
    #[error("OCR服务返回错误状态 {status}: {body}")]
    Status { status: u16, body: String },

    /// 响应体无法解析
    #[error("OCR响应解析失败: {0}")]
    Decode(String),
}

/// 工作站错误分类
#[derive(Debug, Error)]
pub enum StationError {
    /// 缺少必要输入、字段名非法等
    #[error("输入校验失败: {0}")]
    Validation(String),

    /// 扫码未找到对应记录
    #[error("未找到对应数据: {0}")]
    NotFound(String),

    /// 摄像头、电子秤、扫码枪、打印机 I/O 错误
    #[error("{device} 设备错误: {message}")]
    Peripheral { device: String, message: String },

    /// OCR 服务错误
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// 数据库错误
    #[error("数据库错误: {0}")]
    Storage(#[from] sqlx::Error),
}

impl StationError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn peripheral(device: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Peripheral {
            device: device.into(),
            message: message.to_string(),
        }
    }
}

pub type StationResult<T> = std::result::Result<T, StationError>;
