/// Token 文件存储模块
///
/// 每个用户键对应目录中的一个 TOML 文件：`<data_dir>/GmailNotifier/<key>.token.toml`，
/// Token 字段加密后写入。Windows/macOS 上数据目录与配置目录相同，目录不归本存储独占
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::crypto::TokenCipher;
use crate::mail::gmail::types::{StoredToken, TokenRecord};

/// 存储文件版本号
const STORAGE_VERSION: &str = "1.0";

/// Token 文件名后缀
const TOKEN_FILE_SUFFIX: &str = ".token.toml";

/// 存储文件容器
#[derive(Debug, Serialize, Deserialize)]
struct TokenFile {
    /// 文件格式版本
    version: String,

    token: TokenRecord,
}

/// 基于目录的 Token 存储
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
    cipher: TokenCipher,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>, cipher: TokenCipher) -> Self {
        Self {
            dir: dir.into(),
            cipher,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // 用户键只作为文件名使用，过滤掉路径分隔符
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}{}", safe, TOKEN_FILE_SUFFIX))
    }

    /// 由本存储写入的 Token 文件
    fn token_files(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("读取 Token 存储目录失败: {}", self.dir.display()))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let owned = path.is_file()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(TOKEN_FILE_SUFFIX));
            if owned {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// 读取指定用户键的 Token
    ///
    /// # Returns
    /// 文件不存在时返回 `Ok(None)`
    ///
    /// # Errors
    /// - 文件格式错误
    /// - 解密失败（例如换了机器）
    pub fn load(&self, key: &str) -> Result<Option<StoredToken>> {
        let path = self.path_for(key);

        if !path.exists() {
            tracing::debug!("Token 文件不存在: {}", path.display());
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("读取 Token 文件失败: {}", path.display()))?;

        let file: TokenFile =
            toml::from_str(&content).context("解析 Token 文件失败（文件可能损坏）")?;

        if file.version != STORAGE_VERSION {
            tracing::warn!(
                "Token 文件版本不匹配（期望: {}, 实际: {}），尝试兼容加载",
                STORAGE_VERSION,
                file.version
            );
        }

        let token = file.token.open(&self.cipher)?;
        tracing::debug!("已从存储加载 Token: {}", path.display());
        Ok(Some(token))
    }

    /// 保存（覆盖）指定用户键的 Token
    pub fn store(&self, key: &str, token: &StoredToken) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("创建 Token 存储目录失败: {}", self.dir.display()))?;

        let file = TokenFile {
            version: STORAGE_VERSION.to_string(),
            token: token.seal(&self.cipher)?,
        };

        let content = toml::to_string_pretty(&file).context("序列化 Token 失败")?;
        let path = self.path_for(key);
        std::fs::write(&path, content)
            .with_context(|| format!("写入 Token 文件失败: {}", path.display()))?;

        tracing::debug!("Token 已保存到: {}", path.display());
        Ok(())
    }

    /// 删除存储目录中的所有 Token 文件
    ///
    /// 只删除以 `.token.toml` 结尾的文件，目录中的其他文件（例如与数据目录重合时的
    /// `config.toml`）保持不动
    pub fn clear(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }

        for path in self.token_files()? {
            std::fs::remove_file(&path)
                .with_context(|| format!("删除失败: {}", path.display()))?;
        }

        tracing::info!("🗑️ Token 存储已清空: {}", self.dir.display());
        Ok(())
    }

    /// 是否没有任何 Token 文件
    #[cfg(test)]
    pub fn is_empty(&self) -> Result<bool> {
        if !self.dir.exists() {
            return Ok(true);
        }
        Ok(self.token_files()?.is_empty())
    }
}
