/// Gmail 连接
///
/// 持有唯一的一份凭据、Token 与 API 客户端句柄；三者同时存在才算已连接
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::OAuthSettings;
use crate::config::client_secrets::ClientSecrets;
use crate::config::storage::FileTokenStore;
use crate::mail::gmail::{
    AuthError, Authorizer, GMAIL_READONLY_SCOPE, MailApi, StoredToken, TokenManager,
    UserCredential,
};

/// 连接参数
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// 客户端密钥文件
    pub secrets_path: PathBuf,
    /// Token 存储中的用户键
    pub user_key: String,
    /// Gmail API 用户标识（"me" 表示当前授权用户）
    pub user_id: String,
    pub auth_timeout: Duration,
}

impl From<&OAuthSettings> for ConnectionSettings {
    fn from(settings: &OAuthSettings) -> Self {
        Self {
            secrets_path: settings.secrets_path.clone(),
            user_key: settings.store_key.clone(),
            user_id: settings.user_id.clone(),
            auth_timeout: settings.auth_timeout(),
        }
    }
}

pub struct GmailConnection {
    settings: ConnectionSettings,
    tokens: TokenManager,
    api: Arc<dyn MailApi>,

    credential: Option<UserCredential>,
    token: Option<StoredToken>,
    client: Option<Arc<dyn MailApi>>,

    /// 最近一次检查得到的未读数
    mail_count: u32,
}

impl GmailConnection {
    pub fn new(
        settings: ConnectionSettings,
        authorizer: Arc<dyn Authorizer>,
        api: Arc<dyn MailApi>,
        store: FileTokenStore,
    ) -> Self {
        Self {
            settings,
            tokens: TokenManager::new(authorizer, store),
            api,
            credential: None,
            token: None,
            client: None,
            mail_count: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.credential.is_some() && self.token.is_some() && self.client.is_some()
    }

    pub fn mail_count(&self) -> u32 {
        self.mail_count
    }

    /// 连接 Gmail
    ///
    /// 优先复用已保存的 Token；没有时执行交互式授权并保存结果。
    /// 已保存的 Token 只有在授权服务器拒绝刷新时才重新授权，
    /// 暂时性的刷新失败沿用旧 Token，由下一次检查重试刷新。
    /// 失败时保持未连接状态，不重试。
    ///
    /// # Errors
    /// - 客户端密钥文件缺失或格式错误
    /// - 用户拒绝授权 / 授权超时 / 被取消
    /// - Token 交换或保存失败
    pub async fn connect(&mut self, cancel: &CancellationToken) -> Result<()> {
        let secrets = ClientSecrets::load(&self.settings.secrets_path)?;
        let credential = UserCredential {
            secrets,
            user_key: self.settings.user_key.clone(),
        };

        let token = match self.tokens.store().load(&credential.user_key) {
            Ok(Some(mut token)) => {
                tracing::info!("✅ 复用已保存的 Token，无需重新授权");
                match self.tokens.ensure_fresh(&credential, &mut token).await {
                    Ok(_) => token,
                    Err(e) if is_refresh_rejected(&e) => {
                        tracing::warn!("已保存的 Token 被拒绝（{:#}），重新授权", e);
                        self.authorize(&credential, cancel).await?
                    }
                    Err(e) => {
                        tracing::warn!("⚠️ 刷新 Token 暂时失败（{:#}），下次检查时重试", e);
                        token
                    }
                }
            }
            Ok(None) => self.authorize(&credential, cancel).await?,
            Err(e) => {
                tracing::warn!("读取已保存的 Token 失败（{:#}），重新授权", e);
                self.authorize(&credential, cancel).await?
            }
        };

        self.credential = Some(credential);
        self.token = Some(token);
        self.client = Some(self.api.clone());

        tracing::info!("🔗 已连接 Gmail");
        Ok(())
    }

    async fn authorize(
        &self,
        credential: &UserCredential,
        cancel: &CancellationToken,
    ) -> Result<StoredToken> {
        let token = self
            .tokens
            .authorizer()
            .authorize(
                &credential.secrets,
                &[GMAIL_READONLY_SCOPE],
                self.settings.auth_timeout,
                cancel,
            )
            .await?;

        self.tokens
            .store()
            .store(&credential.user_key, &token)
            .context("保存 Token 失败")?;

        tracing::info!("✅ Token 已保存（已加密）");
        Ok(token)
    }

    /// 检查收件箱是否有未读邮件
    ///
    /// 没有客户端句柄时直接返回 `false`，不发起请求。
    /// 只统计第一页结果。
    pub async fn check_messages(&mut self) -> Result<bool> {
        let Some(client) = self.client.clone() else {
            return Ok(false);
        };
        let (Some(credential), Some(token)) = (self.credential.as_ref(), self.token.as_mut()) else {
            return Ok(false);
        };

        self.tokens.ensure_fresh(credential, token).await?;

        let messages = client
            .list_unread(&token.access_token, &self.settings.user_id)
            .await
            .context("查询未读邮件失败")?;

        self.mail_count = u32::try_from(messages.len()).unwrap_or(u32::MAX);
        tracing::debug!("未读邮件: {} 封", self.mail_count);

        Ok(self.mail_count > 0)
    }

    /// 断开连接：撤销 Token 并清空磁盘存储
    ///
    /// 未持有 Token 时什么也不做。撤销失败时返回错误，存储与连接状态保持不变；
    /// 撤销成功后即断开，即使随后清理存储失败。
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(token) = self.token.as_ref() else {
            tracing::debug!("未持有 Token，无需撤销");
            return Ok(());
        };

        self.tokens
            .authorizer()
            .revoke(token.revocation_token())
            .await
            .context("撤销 Token 失败")?;

        // Token 已失效，内存状态先于磁盘清理丢弃
        self.credential = None;
        self.token = None;
        self.client = None;
        self.mail_count = 0;

        self.tokens.store().clear()?;

        tracing::info!("👋 已退出登录");
        Ok(())
    }
}

fn is_refresh_rejected(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<AuthError>(), Some(AuthError::RefreshRejected(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::crypto::TokenCipher;
    use crate::mail::testing::{FakeAuthorizer, FakeMailApi, write_secrets};
    use std::sync::atomic::Ordering;

    struct Fixture {
        dir: tempfile::TempDir,
        auth: Arc<FakeAuthorizer>,
        api: Arc<FakeMailApi>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            write_secrets(dir.path());
            Self {
                dir,
                auth: Arc::new(FakeAuthorizer::default()),
                api: Arc::new(FakeMailApi::default()),
            }
        }

        fn store(&self) -> FileTokenStore {
            FileTokenStore::new(self.dir.path().join("store"), TokenCipher::new([9u8; 32]))
        }

        /// 每次调用相当于一次新的进程启动
        fn connection(&self) -> GmailConnection {
            let settings = ConnectionSettings {
                secrets_path: self.dir.path().join("client_secrets.json"),
                user_key: "user".to_string(),
                user_id: "me".to_string(),
                auth_timeout: Duration::from_secs(5),
            };
            GmailConnection::new(settings, self.auth.clone(), self.api.clone(), self.store())
        }
    }

    fn sample_credential() -> UserCredential {
        UserCredential {
            secrets: ClientSecrets::from_json(crate::mail::testing::SECRETS_JSON).unwrap(),
            user_key: "user".to_string(),
        }
    }

    fn sample_token() -> StoredToken {
        StoredToken::new("a".to_string(), Some("r".to_string()), 3600, Vec::new())
    }

    #[test]
    fn test_connected_requires_all_three() {
        let fx = Fixture::new();
        let api: Arc<dyn MailApi> = fx.api.clone();

        let mut conn = fx.connection();
        assert!(!conn.is_connected());

        conn.credential = Some(sample_credential());
        conn.token = Some(sample_token());
        conn.client = Some(api.clone());
        assert!(conn.is_connected());

        conn.credential = None;
        assert!(!conn.is_connected());
        conn.credential = Some(sample_credential());

        conn.token = None;
        assert!(!conn.is_connected());
        conn.token = Some(sample_token());

        conn.client = None;
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_check_without_client_makes_no_call() {
        let fx = Fixture::new();
        let mut conn = fx.connection();
        conn.credential = Some(sample_credential());
        conn.token = Some(sample_token());

        assert!(!conn.check_messages().await.unwrap());
        assert_eq!(conn.mail_count(), 0);
        assert_eq!(fx.api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_check_counts_first_page() {
        let fx = Fixture::new();
        let mut conn = fx.connection();
        conn.connect(&CancellationToken::new()).await.unwrap();

        fx.api.push_count(0);
        fx.api.push_count(1);
        fx.api.push_count(100);

        assert!(!conn.check_messages().await.unwrap());
        assert_eq!(conn.mail_count(), 0);

        assert!(conn.check_messages().await.unwrap());
        assert_eq!(conn.mail_count(), 1);

        assert!(conn.check_messages().await.unwrap());
        assert_eq!(conn.mail_count(), 100);
    }

    #[tokio::test]
    async fn test_failed_check_keeps_previous_count() {
        let fx = Fixture::new();
        let mut conn = fx.connection();
        conn.connect(&CancellationToken::new()).await.unwrap();

        fx.api.push_count(2);
        fx.api.push_error("connection reset");

        assert!(conn.check_messages().await.unwrap());
        assert!(conn.check_messages().await.is_err());
        assert_eq!(conn.mail_count(), 2);
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_token_reused_after_restart() {
        let fx = Fixture::new();

        // 首次安装：需要交互式授权
        let mut first = fx.connection();
        first.connect(&CancellationToken::new()).await.unwrap();
        assert!(first.is_connected());
        assert_eq!(fx.auth.authorize_calls.load(Ordering::SeqCst), 1);
        assert!(!fx.store().is_empty().unwrap());
        drop(first);

        // 重启：直接复用存储中的 Token
        let mut second = fx.connection();
        second.connect(&CancellationToken::new()).await.unwrap();
        assert!(second.is_connected());
        assert_eq!(fx.auth.authorize_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_secrets_fails_without_prompt() {
        let fx = Fixture::new();
        std::fs::remove_file(fx.dir.path().join("client_secrets.json")).unwrap();

        let mut conn = fx.connection();
        let err = conn.connect(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::SecretsMissing { .. })
        ));
        assert!(!conn.is_connected());
        assert_eq!(fx.auth.authorize_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_denied_consent_stays_disconnected() {
        let fx = Fixture::new();
        fx.auth.deny.store(true, Ordering::SeqCst);

        let mut conn = fx.connection();
        let err = conn.connect(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<AuthError>(),
            Some(AuthError::ConsentDenied(_))
        ));
        assert!(!conn.is_connected());
        assert!(fx.store().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_connect() {
        let fx = Fixture::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut conn = fx.connection();
        let err = conn.connect(&cancel).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<AuthError>(), Some(AuthError::Cancelled)));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_and_saved() {
        let fx = Fixture::new();
        let mut stale = sample_token();
        stale.expires_at = chrono::Utc::now() - chrono::Duration::minutes(1);
        fx.store().store("user", &stale).unwrap();

        let mut conn = fx.connection();
        conn.connect(&CancellationToken::new()).await.unwrap();

        assert_eq!(fx.auth.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.auth.authorize_calls.load(Ordering::SeqCst), 0);

        let saved = fx.store().load("user").unwrap().unwrap();
        assert_eq!(saved.access_token, "ya29.refreshed-access");
        assert_eq!(saved.refresh_token.as_deref(), Some("r"));

        conn.check_messages().await.unwrap();
        assert_eq!(
            fx.api.tokens_seen.lock().unwrap().as_slice(),
            ["ya29.refreshed-access".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rejected_refresh_falls_back_to_authorization() {
        let fx = Fixture::new();
        fx.auth.reject_refresh.store(true, Ordering::SeqCst);
        let mut stale = sample_token();
        stale.expires_at = chrono::Utc::now() - chrono::Duration::minutes(1);
        fx.store().store("user", &stale).unwrap();

        let mut conn = fx.connection();
        conn.connect(&CancellationToken::new()).await.unwrap();

        assert_eq!(fx.auth.authorize_calls.load(Ordering::SeqCst), 1);
        let saved = fx.store().load("user").unwrap().unwrap();
        assert_eq!(saved.access_token, "ya29.fresh-access");
    }

    #[tokio::test]
    async fn test_network_error_on_refresh_keeps_stored_token() {
        let fx = Fixture::new();
        fx.auth.fail_refresh.store(true, Ordering::SeqCst);
        let mut stale = sample_token();
        stale.expires_at = chrono::Utc::now() - chrono::Duration::hours(12);
        fx.store().store("user", &stale).unwrap();

        // 网络尚未就绪：不弹出授权，直接以旧 Token 连接
        let mut conn = fx.connection();
        conn.connect(&CancellationToken::new()).await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(fx.auth.authorize_calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.store().load("user").unwrap().unwrap().access_token, "a");

        // 仍然失败时这次检查报错，不调用 API
        assert!(conn.check_messages().await.is_err());
        assert_eq!(fx.api.calls.load(Ordering::SeqCst), 0);

        // 网络恢复后下一次检查完成刷新
        fx.auth.fail_refresh.store(false, Ordering::SeqCst);
        fx.api.push_count(2);
        assert!(conn.check_messages().await.unwrap());
        assert_eq!(fx.auth.refresh_calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            fx.api.tokens_seen.lock().unwrap().as_slice(),
            ["ya29.refreshed-access".to_string()]
        );
        assert_eq!(
            fx.store().load("user").unwrap().unwrap().access_token,
            "ya29.refreshed-access"
        );
    }

    #[tokio::test]
    async fn test_disconnect_revokes_and_clears_store() {
        let fx = Fixture::new();
        let mut conn = fx.connection();
        conn.connect(&CancellationToken::new()).await.unwrap();
        fx.api.push_count(4);
        conn.check_messages().await.unwrap();

        conn.disconnect().await.unwrap();

        assert!(!conn.is_connected());
        assert_eq!(conn.mail_count(), 0);
        assert!(fx.store().is_empty().unwrap());
        assert_eq!(fx.auth.revoked.lock().unwrap().as_slice(), ["1//refresh".to_string()]);
    }

    #[tokio::test]
    async fn test_disconnect_without_token_is_noop() {
        let fx = Fixture::new();
        let mut conn = fx.connection();

        conn.disconnect().await.unwrap();
        assert!(fx.auth.revoked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoked_token_dropped_even_if_store_clear_fails() {
        let fx = Fixture::new();
        let mut conn = fx.connection();
        conn.connect(&CancellationToken::new()).await.unwrap();

        // 存储目录被替换为普通文件，清理时 read_dir 失败
        let store_dir = fx.dir.path().join("store");
        std::fs::remove_dir_all(&store_dir).unwrap();
        std::fs::write(&store_dir, "not a directory").unwrap();

        assert!(conn.disconnect().await.is_err());
        assert_eq!(fx.auth.revoked.lock().unwrap().len(), 1);
        assert!(!conn.is_connected());
        assert_eq!(conn.mail_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_revocation_keeps_store() {
        let fx = Fixture::new();
        let mut conn = fx.connection();
        conn.connect(&CancellationToken::new()).await.unwrap();
        fx.auth.fail_revoke.store(true, Ordering::SeqCst);

        assert!(conn.disconnect().await.is_err());
        assert!(!fx.store().is_empty().unwrap());
        assert!(conn.is_connected());
    }
}
