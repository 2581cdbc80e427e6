use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod client_secrets;
pub mod crypto;
pub mod storage;

/// 应用名称（配置目录、Token 存储目录均使用此名称）
pub const APP_NAME: &str = "GmailNotifier";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub oauth: OAuthSettings,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub version: String,
    /// 轮询间隔（秒）
    pub poll_interval_secs: u64,
    /// 双击托盘图标时打开的网页收件箱
    pub inbox_url: String,
}

/// OAuth2 相关设置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    /// 客户端密钥文件路径（Google 标准 JSON 格式，相对于工作目录）
    pub secrets_path: PathBuf,
    /// Token 存储中使用的固定用户键
    pub store_key: String,
    /// Gmail API 中的用户标识
    pub user_id: String,
    /// 交互式授权的超时时间（秒）
    pub auth_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            poll_interval_secs: 5 * 60,
            inbox_url: "https://mail.google.com".to_string(),
        }
    }
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            secrets_path: PathBuf::from("client_secrets.json"),
            store_key: "user".to_string(),
            user_id: "me".to_string(),
            auth_timeout_secs: 120,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        // 间隔为 0 会让 tokio::time::interval panic
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl OAuthSettings {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}

/// 获取应用配置目录：`<config_dir>/GmailNotifier`
pub fn app_config_dir() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("无法获取配置目录"))?
        .join(APP_NAME);
    Ok(dir)
}

/// 获取 Token 存储目录：`<data_dir>/GmailNotifier`
pub fn token_store_dir() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .ok_or_else(|| anyhow::anyhow!("无法获取应用数据目录"))?
        .join(APP_NAME);
    Ok(dir)
}

/// 获取配置文件路径
pub fn config_path() -> Result<PathBuf> {
    Ok(app_config_dir()?.join("config.toml"))
}

/// 加载配置（文件不存在时写入默认配置）
pub fn load() -> Result<Config> {
    load_from(&config_path()?)
}

fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        let config = Config::default();
        save_to(&config, path)?;
        tracing::info!("已写入默认配置: {}", path.display());
        return Ok(config);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
    let config: Config = toml::from_str(&content).context("解析配置文件失败")?;
    Ok(config)
}

fn save_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("创建配置目录失败")?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("写入配置文件失败: {}", path.display()))?;
    Ok(())
}
