// 存储领域管理器
//
// 负责记录库、化学品参考库、配置和凭据相关的功能
// 控制线程是记录库的唯一调用方

use std::sync::Arc;
use crate::settings::{CredentialStore, SettingsManager};
use crate::storage::{ChemicalCatalog, RecordRepository};

/// 存储领域管理器 - 负责记录库、参考库、配置和凭据
#[derive(Clone)]
pub struct StorageDomain {
    repo: Arc<dyn RecordRepository>,
    catalog: Arc<ChemicalCatalog>,
    settings: Arc<SettingsManager>,
    credentials: Arc<CredentialStore>,
}

impl StorageDomain {
    /// 创建新的存储领域管理器
    pub fn new(
        repo: Arc<dyn RecordRepository>,
        catalog: Arc<ChemicalCatalog>,
        settings: Arc<SettingsManager>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self {
            repo,
            catalog,
            settings,
            credentials,
        }
    }

    /// 获取记录库
    pub fn get_repo(&self) -> &Arc<dyn RecordRepository> {
        &self.repo
    }

    /// 获取化学品参考库
    pub fn get_catalog(&self) -> &Arc<ChemicalCatalog> {
        &self.catalog
    }

    /// 获取设置管理器
    pub fn get_settings(&self) -> &Arc<SettingsManager> {
        &self.settings
    }

    /// 获取凭据存储
    pub fn get_credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }
}
