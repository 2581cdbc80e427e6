/// Gmail OAuth2 认证流程
///
/// 授权码流程（带 PKCE）：本地回环服务器接收回调，浏览器完成用户授权。
/// Token 刷新与撤销也在这里，交给 oauth2 crate 和 Google 的撤销端点完成。
use anyhow::{Context, Result};
use async_trait::async_trait;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
    basic::BasicClient,
};
use std::path::PathBuf;
use std::time::Duration;
use tiny_http::{Header, Request, Response, Server};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::client_secrets::ClientSecrets;
use crate::mail::gmail::types::{StoredToken, redact};

/// Gmail 只读权限
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// Token 撤销端点
const REVOKE_URL: &str = "https://accounts.google.com/o/oauth2/revoke";

/// 本地服务器端口范围
const PORT_RANGE: std::ops::Range<u16> = 8080..8090;

/// 本地服务器轮询取消标志的间隔
const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// 未返回 expires_in 时假定的有效期
const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(3600);

const PAGE_STYLE: &str = r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Arial, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #f1f3f4;
        }
        .container {
            background: white;
            padding: 40px;
            border-radius: 12px;
            box-shadow: 0 10px 40px rgba(0,0,0,0.15);
            text-align: center;
            max-width: 400px;
        }
        p { color: #666; line-height: 1.6; }"#;

/// 授权成功页面
fn success_html() -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Authorized - GmailNotifier</title>
    <style>{PAGE_STYLE}</style>
</head>
<body>
    <div class="container">
        <h1 style="color: #188038">&#10003; Authorized</h1>
        <p>GmailNotifier can now check your inbox for unread mail.</p>
        <p>You can close this page.</p>
    </div>
</body>
</html>"#
    )
}

/// 授权失败页面
fn error_html(reason: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Authorization failed - GmailNotifier</title>
    <style>{PAGE_STYLE}</style>
</head>
<body>
    <div class="container">
        <h1 style="color: #d93025">&#10007; Authorization failed</h1>
        <p>Google returned: {reason}</p>
        <p>Restart GmailNotifier to try again.</p>
    </div>
</body>
</html>"#
    )
}

/// 授权阶段调用方需要区分的错误
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("无法读取客户端密钥文件 {path}: {source}")]
    SecretsMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("客户端密钥文件格式错误: {0}")]
    SecretsInvalid(String),

    #[error("用户拒绝授权: {0}")]
    ConsentDenied(String),

    #[error("授权超时：用户未在 {0} 秒内完成授权")]
    Timeout(u64),

    #[error("授权已取消")]
    Cancelled,

    #[error("CSRF 验证失败：state 不匹配")]
    CsrfMismatch,

    /// 授权服务器明确拒绝了 Refresh Token（invalid_grant），只能重新授权
    #[error("Refresh Token 已过期或被撤销: {0}")]
    RefreshRejected(String),

    #[error("无法启动本地回调服务器（端口 {}-{} 均被占用）", PORT_RANGE.start, PORT_RANGE.end - 1)]
    NoFreePort,
}

/// OAuth2 授权提供者
///
/// 交互式授权、刷新、撤销三个网络动作的抽象，便于在没有浏览器和网络的情况下测试连接逻辑
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// 执行交互式授权，阻塞（异步地）直到用户完成、拒绝、超时或取消
    async fn authorize(
        &self,
        secrets: &ClientSecrets,
        scopes: &[&str],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<StoredToken>;

    /// 使用 Refresh Token 换取新的 Access Token
    async fn refresh(&self, secrets: &ClientSecrets, token: &StoredToken) -> Result<StoredToken>;

    /// 撤销 Token
    async fn revoke(&self, token: &str) -> Result<()>;
}

/// Google OAuth2 实现
pub struct GoogleAuthorizer {
    http: reqwest::Client,
}

impl GoogleAuthorizer {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Authorizer for GoogleAuthorizer {
    async fn authorize(
        &self,
        secrets: &ClientSecrets,
        scopes: &[&str],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<StoredToken> {
        tracing::info!("🔐 开始 Gmail OAuth2 认证流程");

        // 步骤 1：绑定本地回调端口
        let (server, port) = bind_local_server()?;
        let redirect_uri = format!("http://localhost:{}", port);
        tracing::info!("✅ 本地服务器启动成功: {}", redirect_uri);

        // 步骤 2：生成授权 URL
        let (auth_url, csrf_state, pkce_verifier) = build_auth_url(secrets, scopes, &redirect_uri)?;
        tracing::debug!("授权 URL: {}", auth_url);

        // 步骤 3：后台线程等待回调；流程结束时（任何路径）通过 drop guard 停止服务器
        let server_cancel = cancel.child_token();
        let _server_guard = server_cancel.clone().drop_guard();
        let (code_tx, code_rx) = oneshot::channel();
        std::thread::spawn(move || wait_for_callback(server, port, code_tx, server_cancel));

        // 步骤 4：打开浏览器
        if let Err(e) = webbrowser::open(auth_url.as_str()) {
            tracing::warn!("无法打开浏览器（{}），请手动访问: {}", e, auth_url);
        } else {
            tracing::info!("✅ 浏览器已打开，等待用户授权...");
        }

        // 步骤 5：等待回调（带超时与取消）
        let callback = tokio::select! {
            res = tokio::time::timeout(timeout, code_rx) => match res {
                Ok(Ok(callback)) => callback,
                Ok(Err(_)) => anyhow::bail!("本地服务器意外退出"),
                Err(_) => return Err(AuthError::Timeout(timeout.as_secs()).into()),
            },
            _ = cancel.cancelled() => return Err(AuthError::Cancelled.into()),
        };
        let (received_code, received_state) = callback?;
        tracing::info!("✅ 收到授权回调");

        // 步骤 6：验证 CSRF state
        if received_state.secret() != csrf_state.secret() {
            return Err(AuthError::CsrfMismatch.into());
        }

        // 步骤 7：交换 Token
        let token = exchange_code_for_token(received_code, pkce_verifier, secrets, &redirect_uri)
            .await
            .context("Token 交换失败")?;

        let granted: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
        let stored = StoredToken::new(
            token.access_token().secret().to_string(),
            token.refresh_token().map(|t| t.secret().to_string()),
            expires_in_secs(token.expires_in()),
            granted,
        );

        if stored.refresh_token.is_none() {
            tracing::warn!("⚠️ 未收到 refresh_token，Access Token 过期后需要重新授权");
        }

        tracing::info!("🎉 OAuth2 认证流程完成");
        tracing::debug!("Access Token: {}", redact(&stored.access_token));
        Ok(stored)
    }

    async fn refresh(&self, secrets: &ClientSecrets, token: &StoredToken) -> Result<StoredToken> {
        let refresh_token = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("没有 Refresh Token，无法刷新"))?;

        tracing::debug!("开始刷新 Access Token");

        let response = oauth_client(secrets, true)?
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| {
                let error_msg = e.to_string();
                if is_refresh_rejected(&error_msg) {
                    tracing::error!("❌ Token 刷新失败 [授权被拒绝/已过期]: {}", error_msg);
                    anyhow::Error::from(AuthError::RefreshRejected(error_msg))
                } else {
                    anyhow::anyhow!("Refresh Token 交换失败: {}", error_msg)
                }
            })?;

        // Google 刷新时通常不再返回 refresh_token，沿用旧值
        let refreshed = StoredToken::new(
            response.access_token().secret().to_string(),
            response
                .refresh_token()
                .map(|t| t.secret().to_string())
                .or_else(|| token.refresh_token.clone()),
            expires_in_secs(response.expires_in()),
            token.scopes.clone(),
        );

        tracing::info!("✅ Access Token 刷新成功（新的过期时间: {}）", refreshed.expires_at);
        Ok(refreshed)
    }

    async fn revoke(&self, token: &str) -> Result<()> {
        tracing::info!("正在撤销 Token: {}", redact(token));

        let response = self
            .http
            .post(REVOKE_URL)
            .query(&[("token", token)])
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .send()
            .await
            .context("请求撤销端点失败")?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("✅ Token 已撤销");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if is_already_revoked(status, &body) {
            tracing::warn!("Token 已失效（可能已在别处撤销），视为撤销成功");
            return Ok(());
        }

        anyhow::bail!("撤销端点返回错误 {}: {}", status, body)
    }
}

/// 只有 `invalid_grant` 表示 Refresh Token 本身失效；网络错误等可以稍后重试
fn is_refresh_rejected(error_msg: &str) -> bool {
    error_msg.contains("invalid_grant")
}

/// Google 对已失效 Token 返回 400 `invalid_token`
fn is_already_revoked(status: reqwest::StatusCode, body: &str) -> bool {
    status == reqwest::StatusCode::BAD_REQUEST && body.contains("invalid_token")
}

fn expires_in_secs(expires_in: Option<Duration>) -> i64 {
    expires_in.unwrap_or(DEFAULT_EXPIRES_IN).as_secs() as i64
}

fn oauth_client(secrets: &ClientSecrets, with_secret: bool) -> Result<BasicClient> {
    let client_secret = with_secret.then(|| ClientSecret::new(secrets.client_secret.clone()));

    Ok(BasicClient::new(
        ClientId::new(secrets.client_id.clone()),
        client_secret,
        AuthUrl::new(secrets.auth_uri.clone()).context("auth_uri 无效")?,
        Some(TokenUrl::new(secrets.token_uri.clone()).context("token_uri 无效")?),
    ))
}

/// 在端口范围内绑定第一个可用端口
fn bind_local_server() -> Result<(Server, u16)> {
    for port in PORT_RANGE {
        match Server::http(("127.0.0.1", port)) {
            Ok(server) => return Ok((server, port)),
            Err(e) => tracing::debug!("端口 {} 不可用: {}", port, e),
        }
    }
    Err(AuthError::NoFreePort.into())
}

/// 生成授权 URL（PKCE, RFC 7636）
fn build_auth_url(
    secrets: &ClientSecrets,
    scopes: &[&str],
    redirect_uri: &str,
) -> Result<(Url, CsrfToken, PkceCodeVerifier)> {
    let client = oauth_client(secrets, true)?
        .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string())?);

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let (auth_url, csrf_state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(scopes.iter().map(|s| Scope::new(s.to_string())))
        // offline + consent 才能拿到 refresh_token
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(pkce_challenge)
        .url();

    Ok((auth_url, csrf_state, pkce_verifier))
}

type Callback = std::result::Result<(AuthorizationCode, CsrfToken), AuthError>;

/// 回调请求的解析结果
#[derive(Debug, PartialEq, Eq)]
enum CallbackParams {
    Code { code: String, state: String },
    Denied(String),
    /// 与授权无关的请求（如 /favicon.ico）
    Ignored,
}

fn parse_callback(port: u16, request_url: &str) -> CallbackParams {
    let Ok(parsed) = Url::parse(&format!("http://localhost:{}{}", port, request_url)) else {
        return CallbackParams::Ignored;
    };

    let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

    if let Some(error) = params.get("error") {
        return CallbackParams::Denied(error.clone());
    }

    match (params.get("code"), params.get("state")) {
        (Some(code), Some(state)) => CallbackParams::Code {
            code: code.clone(),
            state: state.clone(),
        },
        _ => CallbackParams::Ignored,
    }
}

fn respond_html(request: Request, status: u16, body: String) {
    let mut response = Response::from_string(body).with_status_code(status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..])
    {
        response = response.with_header(header);
    }
    if let Err(e) = request.respond(response) {
        tracing::warn!("回写授权页面失败: {}", e);
    }
}

/// 在独立线程中等待 OAuth2 回调，收到结果或被取消后退出
fn wait_for_callback(
    server: Server,
    port: u16,
    code_tx: oneshot::Sender<Callback>,
    cancel: CancellationToken,
) {
    tracing::debug!("本地服务器监听: 127.0.0.1:{}", port);

    while !cancel.is_cancelled() {
        let request = match server.recv_timeout(SERVER_POLL_INTERVAL) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!("本地服务器接收请求失败: {}", e);
                break;
            }
        };

        match parse_callback(port, request.url()) {
            CallbackParams::Code { code, state } => {
                respond_html(request, 200, success_html());
                code_tx
                    .send(Ok((AuthorizationCode::new(code), CsrfToken::new(state))))
                    .ok();
                return;
            }
            CallbackParams::Denied(reason) => {
                tracing::error!("用户拒绝授权: {}", reason);
                respond_html(request, 200, error_html(&reason));
                code_tx.send(Err(AuthError::ConsentDenied(reason))).ok();
                return;
            }
            CallbackParams::Ignored => {
                respond_html(request, 404, String::new());
            }
        }
    }

    tracing::debug!("本地服务器已停止");
}

/// 交换授权码为 Token
///
/// 部分桌面客户端配置在带 client_secret 时返回 invalid_client，此时以公共客户端
/// （仅 PKCE）重试一次
async fn exchange_code_for_token(
    code: AuthorizationCode,
    verifier: PkceCodeVerifier,
    secrets: &ClientSecrets,
    redirect_uri: &str,
) -> Result<oauth2::basic::BasicTokenResponse> {
    let code_secret = code.secret().to_string();
    let verifier_secret = verifier.secret().to_string();

    let client = oauth_client(secrets, true)?
        .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string())?);

    let first = client
        .exchange_code(AuthorizationCode::new(code_secret.clone()))
        .set_pkce_verifier(PkceCodeVerifier::new(verifier_secret.clone()))
        .request_async(oauth2::reqwest::async_http_client)
        .await;

    let err = match first {
        Ok(token) => return Ok(token),
        Err(e) => e,
    };

    let err_str = format!("{:?}", err);
    if !(err_str.contains("invalid_client") || err_str.contains("Unauthorized")) {
        return Err(anyhow::anyhow!("Token 交换请求失败: {}", err));
    }

    tracing::warn!("首次交换返回 invalid_client，使用不带 client_secret 的公共客户端重试");

    let public_client = oauth_client(secrets, false)?
        .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string())?);

    public_client
        .exchange_code(AuthorizationCode::new(code_secret))
        .set_pkce_verifier(PkceCodeVerifier::new(verifier_secret))
        .request_async(oauth2::reqwest::async_http_client)
        .await
        .map_err(|e| anyhow::anyhow!("使用 PKCE-only 重试仍失败: {}", e))
}
