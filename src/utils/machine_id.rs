/// 机器指纹与加密密钥派生模块
///
/// 读取本机唯一标识（Windows 注册表 MachineGuid / Linux machine-id），
/// 使用 Argon2 派生 Token 加密密钥
use anyhow::{Context, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHasher, SaltString},
};

/// 固定盐值（所有用户相同，唯一性来自机器标识）
const FIXED_SALT: &[u8] = b"GmailNotifier.v1";

/// 从 Windows 注册表获取机器 GUID
///
/// 读取路径：`HKEY_LOCAL_MACHINE\SOFTWARE\Microsoft\Cryptography\MachineGuid`
#[cfg(windows)]
fn get_machine_id() -> Result<String> {
    use winreg::RegKey;
    use winreg::enums::HKEY_LOCAL_MACHINE;

    tracing::debug!("正在从注册表读取机器 GUID");

    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
    let crypto_key = hklm
        .open_subkey("SOFTWARE\\Microsoft\\Cryptography")
        .context("无法打开注册表键：HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Cryptography")?;

    let guid: String = crypto_key
        .get_value("MachineGuid")
        .context("无法读取 MachineGuid 值")?;

    Ok(guid)
}

/// 读取 systemd / dbus 的 machine-id
#[cfg(not(windows))]
fn get_machine_id() -> Result<String> {
    const CANDIDATES: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

    for path in CANDIDATES {
        if let Ok(id) = std::fs::read_to_string(path) {
            let id = id.trim();
            if !id.is_empty() {
                tracing::debug!("机器标识读取成功: {}", path);
                return Ok(id.to_string());
            }
        }
    }

    // 没有 machine-id 的系统（如部分 macOS 环境）退回到主机名 + 用户目录
    let home = dirs::home_dir().context("无法获取用户目录")?;
    let fallback = format!(
        "{}:{}",
        std::env::var("HOSTNAME").unwrap_or_default(),
        home.display()
    );
    tracing::warn!("未找到 machine-id，使用回退标识派生密钥");
    Ok(fallback)
}

/// 从机器标识派生 256-bit 加密密钥
pub fn derive_encryption_key() -> Result<[u8; 32]> {
    derive_key_from(&get_machine_id()?)
}

/// Argon2id 派生；相同输入总是得到相同密钥
fn derive_key_from(machine_id: &str) -> Result<[u8; 32]> {
    let salt = SaltString::encode_b64(FIXED_SALT)
        .map_err(|e| anyhow::anyhow!("盐值编码失败: {}", e))?;

    let password_hash = Argon2::default()
        .hash_password(machine_id.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Argon2 哈希失败: {}", e))?;

    let hash = password_hash
        .hash
        .ok_or_else(|| anyhow::anyhow!("哈希值为空"))?;

    let hash_slice = hash.as_bytes();
    if hash_slice.len() < 32 {
        anyhow::bail!("哈希长度不足 32 字节（实际: {}）", hash_slice.len());
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&hash_slice[..32]);

    tracing::debug!("加密密钥派生成功（256-bit）");
    Ok(key)
}
