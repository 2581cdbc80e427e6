//! 测试用的授权器与邮件 API 替身

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::client_secrets::ClientSecrets;
use crate::mail::gmail::{AuthError, Authorizer, MailApi, MessageRef, StoredToken};

pub const SECRETS_JSON: &str =
    r#"{"installed": {"client_id": "test.apps.googleusercontent.com", "client_secret": "cs"}}"#;

pub fn write_secrets(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("client_secrets.json");
    std::fs::write(&path, SECRETS_JSON).unwrap();
    path
}

#[derive(Default)]
pub struct FakeAuthorizer {
    pub authorize_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub revoked: Mutex<Vec<String>>,
    pub deny: AtomicBool,
    /// 刷新时模拟网络错误
    pub fail_refresh: AtomicBool,
    /// 刷新时模拟 invalid_grant
    pub reject_refresh: AtomicBool,
    pub fail_revoke: AtomicBool,
}

#[async_trait]
impl Authorizer for FakeAuthorizer {
    async fn authorize(
        &self,
        _secrets: &ClientSecrets,
        scopes: &[&str],
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<StoredToken> {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);

        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled.into());
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(AuthError::ConsentDenied("access_denied".to_string()).into());
        }

        Ok(StoredToken::new(
            "ya29.fresh-access".to_string(),
            Some("1//refresh".to_string()),
            3600,
            scopes.iter().map(|s| s.to_string()).collect(),
        ))
    }

    async fn refresh(&self, _secrets: &ClientSecrets, token: &StoredToken) -> Result<StoredToken> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);

        if self.reject_refresh.load(Ordering::SeqCst) {
            return Err(AuthError::RefreshRejected("invalid_grant".to_string()).into());
        }
        if self.fail_refresh.load(Ordering::SeqCst) {
            anyhow::bail!("error sending request: dns error");
        }

        Ok(StoredToken::new(
            "ya29.refreshed-access".to_string(),
            token.refresh_token.clone(),
            3600,
            token.scopes.clone(),
        ))
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        if self.fail_revoke.load(Ordering::SeqCst) {
            anyhow::bail!("网络不可用");
        }
        self.revoked.lock().unwrap().push(token.to_string());
        Ok(())
    }
}

/// 按顺序返回预设结果的邮件 API；队列为空时返回空列表
#[derive(Default)]
pub struct FakeMailApi {
    pub calls: AtomicUsize,
    pub tokens_seen: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<Result<usize, String>>>,
}

impl FakeMailApi {
    pub fn push_count(&self, count: usize) {
        self.responses.lock().unwrap().push_back(Ok(count));
    }

    pub fn push_error(&self, message: &str) {
        self.responses.lock().unwrap().push_back(Err(message.to_string()));
    }
}

#[async_trait]
impl MailApi for FakeMailApi {
    async fn list_unread(&self, access_token: &str, _user_id: &str) -> Result<Vec<MessageRef>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen.lock().unwrap().push(access_token.to_string());

        let next = self.responses.lock().unwrap().pop_front().unwrap_or(Ok(0));
        match next {
            Ok(count) => Ok((0..count)
                .map(|i| MessageRef {
                    id: format!("m{}", i),
                    thread_id: format!("t{}", i),
                })
                .collect()),
            Err(message) => Err(anyhow::anyhow!(message)),
        }
    }
}
