/// Gmail 模块 - OAuth2 认证与 API 调用
pub mod api;
pub mod oauth;
pub mod token;
pub mod types;

// 重新导出常用类型
pub use api::{GmailApiClient, MailApi};
pub use oauth::{AuthError, Authorizer, GMAIL_READONLY_SCOPE, GoogleAuthorizer};
pub use token::TokenManager;
pub use types::{MessageRef, StoredToken, UserCredential};
