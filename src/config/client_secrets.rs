/// OAuth2 客户端密钥读取模块
///
/// 解析 Google Cloud Console 下载的标准 `client_secrets.json`，
/// 支持 `installed`（桌面应用）与 `web` 两种格式
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::mail::gmail::AuthError;

/// Google 默认授权端点
pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Google 默认 Token 端点
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// 客户端应用密钥
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSecrets {
    /// OAuth2 客户端 ID
    pub client_id: String,

    /// OAuth2 客户端密钥
    pub client_secret: String,

    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,

    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// 文件顶层结构：`{"installed": {...}}` 或 `{"web": {...}}`
#[derive(Debug, Deserialize)]
struct SecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// 从文件加载客户端密钥
    ///
    /// # Errors
    /// - 文件不存在或无法读取 -> [`AuthError::SecretsMissing`]
    /// - JSON 格式错误或缺少 `installed`/`web` 段 -> [`AuthError::SecretsInvalid`]
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let content = std::fs::read_to_string(path).map_err(|source| AuthError::SecretsMissing {
            path: path.to_path_buf(),
            source,
        })?;

        let secrets = Self::from_json(&content)?;
        tracing::info!("✅ 已加载客户端密钥: {}", path.display());
        Ok(secrets)
    }

    /// 解析 JSON 文本
    pub fn from_json(content: &str) -> Result<Self, AuthError> {
        let file: SecretsFile = serde_json::from_str(content)
            .map_err(|e| AuthError::SecretsInvalid(e.to_string()))?;

        let secrets = file
            .installed
            .or(file.web)
            .ok_or_else(|| AuthError::SecretsInvalid("缺少 installed 或 web 段".to_string()))?;

        if secrets.client_id.trim().is_empty() {
            return Err(AuthError::SecretsInvalid("client_id 为空".to_string()));
        }

        Ok(secrets)
    }
}
