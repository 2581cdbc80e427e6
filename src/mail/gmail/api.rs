/// Gmail API 调用模块
///
/// 只有一个查询：收件箱中未读邮件的第一页列表
use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::mail::gmail::types::{ListMessagesResponse, MessageRef};

/// Gmail API 基础地址
const BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// 未读查询使用的标签（同时满足）
pub const UNREAD_INBOX_LABELS: [&str; 2] = ["INBOX", "UNREAD"];

/// 邮件查询接口
#[async_trait]
pub trait MailApi: Send + Sync {
    /// 列出收件箱中的未读邮件（仅第一页，不含垃圾邮件与已删除邮件）
    async fn list_unread(&self, access_token: &str, user_id: &str) -> Result<Vec<MessageRef>>;
}

/// Gmail REST API 客户端
pub struct GmailApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl GmailApiClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: BASE_URL.to_string(),
        }
    }

    fn messages_url(&self, user_id: &str) -> String {
        format!("{}/users/{}/messages", self.base_url, user_id)
    }

    fn unread_query() -> Vec<(&'static str, &'static str)> {
        let mut query: Vec<_> = UNREAD_INBOX_LABELS
            .iter()
            .map(|label| ("labelIds", *label))
            .collect();
        query.push(("includeSpamTrash", "false"));
        query
    }
}

#[async_trait]
impl MailApi for GmailApiClient {
    async fn list_unread(&self, access_token: &str, user_id: &str) -> Result<Vec<MessageRef>> {
        tracing::debug!("正在查询未读邮件列表...");

        let response = self
            .http
            .get(self.messages_url(user_id))
            .query(&Self::unread_query())
            .bearer_auth(access_token)
            .send()
            .await
            .context("请求邮件列表失败")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status == reqwest::StatusCode::UNAUTHORIZED {
                anyhow::bail!("Token 已失效（401）: {}", error_text);
            }

            anyhow::bail!("Gmail API 返回错误 {}: {}", status, error_text);
        }

        let list: ListMessagesResponse = response.json().await.context("解析邮件列表响应失败")?;

        if list.next_page_token.is_some() {
            tracing::debug!(
                "未读邮件超过一页（估计 {:?} 封），只统计第一页",
                list.result_size_estimate
            );
        }

        Ok(list.messages.unwrap_or_default())
    }
}
