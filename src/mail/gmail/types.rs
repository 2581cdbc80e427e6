/// Gmail 凭据与 API 数据结构
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::client_secrets::ClientSecrets;
use crate::config::crypto::{self, TokenCipher};

/// 用户凭据：客户端密钥 + Token 存储中的用户键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredential {
    pub secrets: ClientSecrets,
    pub user_key: String,
}

/// 内存中的 OAuth2 Token（明文）
#[derive(Clone, PartialEq, Eq)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Access Token 过期时间（UTC）
    pub expires_at: DateTime<Utc>,
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for StoredToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredToken")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(redact))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// 日志中只显示 Token 首尾几位
pub fn redact(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 10 {
        return "***".to_string();
    }
    let head: String = chars[..5].iter().collect();
    let tail: String = chars[chars.len() - 5..].iter().collect();
    format!("{}...{}", head, tail)
}

impl StoredToken {
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_in_seconds: i64,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_seconds),
            scopes,
        }
    }

    /// 检查 Token 是否即将过期
    ///
    /// # Arguments
    /// * `threshold_minutes` - 提前多少分钟算作"即将过期"
    pub fn is_expiring(&self, threshold_minutes: i64) -> bool {
        let threshold = Utc::now() + chrono::Duration::minutes(threshold_minutes);
        self.expires_at <= threshold
    }

    /// 撤销时使用的 Token：优先 Refresh Token，其次 Access Token
    pub fn revocation_token(&self) -> &str {
        self.refresh_token.as_deref().unwrap_or(&self.access_token)
    }

    /// 加密为磁盘记录
    pub fn seal(&self, cipher: &TokenCipher) -> Result<TokenRecord> {
        let refresh_token = match &self.refresh_token {
            Some(token) => Some(cipher.encrypt(token).context("加密 Refresh Token 失败")?),
            None => None,
        };

        Ok(TokenRecord {
            access_token: cipher
                .encrypt(&self.access_token)
                .context("加密 Access Token 失败")?,
            refresh_token,
            expires_at: self.expires_at,
            scopes: self.scopes.clone(),
        })
    }
}

/// 磁盘上的 Token 记录（Token 字段均为 `encrypted:...` 格式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(deserialize_with = "deserialize_encrypted")]
    access_token: String,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_encrypted_opt"
    )]
    refresh_token: Option<String>,

    expires_at: DateTime<Utc>,

    #[serde(default)]
    scopes: Vec<String>,
}

impl TokenRecord {
    /// 解密为内存 Token
    pub fn open(&self, cipher: &TokenCipher) -> Result<StoredToken> {
        let refresh_token = match &self.refresh_token {
            Some(token) => Some(cipher.decrypt(token).context("解密 Refresh Token 失败")?),
            None => None,
        };

        Ok(StoredToken {
            access_token: cipher
                .decrypt(&self.access_token)
                .context("解密 Access Token 失败")?,
            refresh_token,
            expires_at: self.expires_at,
            scopes: self.scopes.clone(),
        })
    }
}

/// 反序列化 Token（保持加密状态，拒绝明文）
fn deserialize_encrypted<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;

    if !crypto::is_encrypted(&s) {
        return Err(serde::de::Error::custom(
            "Token 格式错误：应为加密格式（encrypted:...）",
        ));
    }

    Ok(s)
}

fn deserialize_encrypted_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserialize_encrypted(deserializer).map(Some)
}

/// `users.messages.list` 响应
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesResponse {
    /// 无匹配邮件时 Gmail 省略该字段
    pub messages: Option<Vec<MessageRef>>,
    pub next_page_token: Option<String>,
    pub result_size_estimate: Option<u32>,
}

/// 邮件引用（列表接口只返回 ID）
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    pub thread_id: String,
}
