// OCR 模块 - 画面编码与 OCR 服务调用

use crate::error::ServiceError;
use crate::models::OcrSettings;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

/// OCR 服务接口
#[async_trait]
pub trait OcrService: Send + Sync {
    /// 识别一张 JPEG 图片，返回纯文本
    async fn recognize(&self, jpeg: Vec<u8>) -> Result<String, ServiceError>;
}

/// 把画面编码为 JPEG
pub fn encode_jpeg(frame: &DynamicImage, quality: u8) -> Result<Vec<u8>, ServiceError> {
    // JPEG 不支持透明通道
    let rgb = frame.to_rgb8();
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)
        .map_err(|e| ServiceError::Decode(format!("图像编码失败: {}", e)))?;
    Ok(buffer)
}

/// 构造请求体
pub fn build_request(jpeg: &[u8]) -> Value {
    json!({
        "base64": general_purpose::STANDARD.encode(jpeg),
        "options": {
            "data.format": "text",
        }
    })
}

/// 从响应中取出识别文本；没有 data 字段视为没有识别到文字
pub fn parse_response(body: &str) -> Result<String, ServiceError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| ServiceError::Decode(e.to_string()))?;

    match value.get("data") {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(text)) => Ok(text.clone()),
        Some(other) => Err(ServiceError::Decode(format!("data 字段不是文本: {}", other))),
    }
}

/// 基于 HTTP 的 OCR 服务客户端
pub struct HttpOcrClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpOcrClient {
    pub fn new(client: reqwest::Client, settings: &OcrSettings) -> Self {
        Self {
            client,
            url: settings.url.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn map_error(&self, err: reqwest::Error) -> ServiceError {
        if err.is_timeout() {
            ServiceError::Timeout(self.timeout.as_secs().max(1))
        } else if err.is_connect() {
            ServiceError::Unreachable(err.to_string())
        } else {
            ServiceError::Unreachable(format!("OCR请求失败: {}", err))
        }
    }
}

#[async_trait]
impl OcrService for HttpOcrClient {
    async fn recognize(&self, jpeg: Vec<u8>) -> Result<String, ServiceError> {
        debug!("调用OCR服务: {} ({} 字节)", self.url, jpeg.len());

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&build_request(&jpeg))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_error(e))?;

        if !status.is_success() {
            error!("OCR服务错误: {} - {}", status, body);
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_response(&body)
    }
}
