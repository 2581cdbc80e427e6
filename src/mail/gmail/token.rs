/// Token 自动刷新管理模块
use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::storage::FileTokenStore;
use crate::mail::gmail::oauth::Authorizer;
use crate::mail::gmail::types::{StoredToken, UserCredential};

/// Token 刷新阈值（提前多少分钟刷新）
pub const REFRESH_THRESHOLD_MINUTES: i64 = 5;

/// Token 管理器
///
/// 在使用前检查 Access Token 是否即将过期，需要时刷新并写回存储
pub struct TokenManager {
    authorizer: Arc<dyn Authorizer>,
    store: FileTokenStore,
}

impl TokenManager {
    pub fn new(authorizer: Arc<dyn Authorizer>, store: FileTokenStore) -> Self {
        Self { authorizer, store }
    }

    /// 确保 Token 可用
    ///
    /// # Returns
    /// 发生了刷新时返回 `true`
    ///
    /// # Errors
    /// - 刷新请求失败
    /// - 写回存储失败
    pub async fn ensure_fresh(
        &self,
        credential: &UserCredential,
        token: &mut StoredToken,
    ) -> Result<bool> {
        if !token.is_expiring(REFRESH_THRESHOLD_MINUTES) {
            return Ok(false);
        }

        if token.refresh_token.is_none() {
            tracing::warn!("Access Token 即将过期且没有 Refresh Token，继续使用旧 Token");
            return Ok(false);
        }

        tracing::info!("Access Token 即将过期（{}），自动刷新", token.expires_at);

        let refreshed = self
            .authorizer
            .refresh(&credential.secrets, token)
            .await
            .context("刷新 Access Token 失败")?;

        self.store
            .store(&credential.user_key, &refreshed)
            .context("保存刷新后的 Token 失败")?;

        *token = refreshed;
        Ok(true)
    }

    pub fn store(&self) -> &FileTokenStore {
        &self.store
    }

    pub fn authorizer(&self) -> &Arc<dyn Authorizer> {
        &self.authorizer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::client_secrets::ClientSecrets;
    use crate::config::crypto::TokenCipher;
    use crate::mail::testing::{FakeAuthorizer, SECRETS_JSON};
    use std::sync::atomic::Ordering;

    fn manager(dir: &std::path::Path) -> (Arc<FakeAuthorizer>, TokenManager) {
        let auth = Arc::new(FakeAuthorizer::default());
        let store = FileTokenStore::new(dir.join("store"), TokenCipher::new([3u8; 32]));
        (auth.clone(), TokenManager::new(auth, store))
    }

    fn credential() -> UserCredential {
        UserCredential {
            secrets: ClientSecrets::from_json(SECRETS_JSON).unwrap(),
            user_key: "user".to_string(),
        }
    }

    #[tokio::test]
    async fn test_valid_token_not_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        let (auth, manager) = manager(dir.path());
        let mut token = StoredToken::new("ya29.valid".to_string(), Some("1//r".to_string()), 3600, vec![]);

        assert!(!manager.ensure_fresh(&credential(), &mut token).await.unwrap());
        assert_eq!(token.access_token, "ya29.valid");
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expiring_token_refreshed_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let (auth, manager) = manager(dir.path());
        let mut token = StoredToken::new("ya29.old".to_string(), Some("1//r".to_string()), 60, vec![]);

        assert!(manager.ensure_fresh(&credential(), &mut token).await.unwrap());
        assert_eq!(token.access_token, "ya29.refreshed-access");
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);

        let saved = manager.store().load("user").unwrap().unwrap();
        assert_eq!(saved.access_token, "ya29.refreshed-access");
        assert_eq!(saved.refresh_token.as_deref(), Some("1//r"));
    }

    #[tokio::test]
    async fn test_expiring_without_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let (auth, manager) = manager(dir.path());
        let mut token = StoredToken::new("ya29.old".to_string(), None, 0, vec![]);

        assert!(!manager.ensure_fresh(&credential(), &mut token).await.unwrap());
        assert_eq!(token.access_token, "ya29.old");
        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_old_token() {
        let dir = tempfile::tempdir().unwrap();
        let (auth, manager) = manager(dir.path());
        auth.fail_refresh.store(true, Ordering::SeqCst);
        let mut token = StoredToken::new("ya29.old".to_string(), Some("1//r".to_string()), 0, vec![]);

        assert!(manager.ensure_fresh(&credential(), &mut token).await.is_err());
        assert_eq!(token.access_token, "ya29.old");
        assert!(manager.store().load("user").unwrap().is_none());
    }
}
