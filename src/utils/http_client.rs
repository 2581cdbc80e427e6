/// 共享 HTTP 客户端
///
/// 启动时构建一次，由 Gmail API 客户端与授权器共同持有（reqwest::Client 内部是 Arc，
/// clone 只增加引用计数），复用连接池与 Keep-Alive
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

use crate::config::HttpConfig;

/// 按配置构建 HTTP 客户端
pub fn build(config: &HttpConfig) -> Result<Client> {
    Client::builder()
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(300))
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent(concat!("GmailNotifier/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("构建 HTTP 客户端失败")
}
