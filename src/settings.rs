use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::warn;

use crate::models::{PersistedStationConfig, StationConfigUpdate};

pub struct SettingsManager {
    path: PathBuf,
    data: RwLock<PersistedStationConfig>,
}

impl SettingsManager {
    pub async fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let initial = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                serde_json::from_slice::<PersistedStationConfig>(&bytes).unwrap_or_else(|e| {
                    warn!("配置文件解析失败，使用默认配置: {}", e);
                    PersistedStationConfig::default()
                })
            }
            _ => {
                let default = PersistedStationConfig::default();
                let json = serde_json::to_string_pretty(&default)?;
                tokio::fs::write(&path, json).await?;
                default
            }
        };

        Ok(Self {
            path,
            data: RwLock::new(initial),
        })
    }

    pub async fn get(&self) -> PersistedStationConfig {
        self.data.read().await.clone()
    }

    pub async fn update(&self, update: StationConfigUpdate) -> Result<PersistedStationConfig> {
        let mut config = self.data.write().await;

        if let Some(value) = update.warehouse_id {
            config.warehouse_id = value;
        }
        if let Some(ocr) = update.ocr {
            config.ocr = ocr;
        }
        if let Some(camera) = update.camera {
            config.camera = camera;
        }
        if let Some(scanner) = update.scanner {
            config.scanner = scanner;
        }
        if let Some(scale) = update.scale {
            config.scale = scale;
        }
        if let Some(printer) = update.printer {
            config.printer = printer;
        }
        if let Some(timeout) = update.worker_join_timeout_ms {
            config.worker_join_timeout_ms = timeout;
        }
        if let Some(fields) = update.required_fields {
            config.required_fields = fields;
        }

        self.save(&config).await?;
        Ok(config.clone())
    }

    async fn save(&self, config: &PersistedStationConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

/// 网络凭据（网络名 -> 密码），只负责存取
pub struct CredentialStore {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl CredentialStore {
    pub async fn load(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let initial = match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("凭据文件解析失败，按空处理: {}", e);
                BTreeMap::new()
            }),
            _ => BTreeMap::new(),
        };

        Ok(Self {
            path,
            data: RwLock::new(initial),
        })
    }

    /// 已保存的网络名
    pub async fn list(&self) -> Vec<String> {
        self.data.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, network: &str) -> Option<String> {
        self.data.read().await.get(network).cloned()
    }

    pub async fn upsert(&self, network: &str, secret: &str) -> Result<()> {
        let mut data = self.data.write().await;
        data.insert(network.to_string(), secret.to_string());
        self.save(&data).await
    }

    /// 删除凭据，返回是否存在
    pub async fn remove(&self, network: &str) -> Result<bool> {
        let mut data = self.data.write().await;
        if data.remove(network).is_none() {
            return Ok(false);
        }
        self.save(&data).await?;
        Ok(true)
    }

    async fn save(&self, data: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}
