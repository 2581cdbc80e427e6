// 托盘指示状态：图标 + 提示文字

use crate::config::APP_NAME;
use crate::sync::InboxStatus;

/// 托盘图标状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayIconState {
    /// 没有未读邮件或未连接
    Off,
    /// 有未读邮件
    On,
}

/// 托盘应显示的内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indicator {
    pub state: TrayIconState,
    pub tooltip: String,
}

impl Indicator {
    /// 启动时（尚未连接）的状态
    pub fn disconnected() -> Self {
        Self {
            state: TrayIconState::Off,
            tooltip: APP_NAME.to_string(),
        }
    }
}

impl From<InboxStatus> for Indicator {
    fn from(status: InboxStatus) -> Self {
        let state = if status.has_unread {
            TrayIconState::On
        } else {
            TrayIconState::Off
        };

        Self {
            state,
            tooltip: unread_tooltip(status.unread),
        }
    }
}

/// 未读提示文字：只有数量大于 1 时使用复数（0 与 1 都是单数）
pub fn unread_tooltip(count: u32) -> String {
    let suffix = if count > 1 { "s" } else { "" };
    format!("{} unread email{}", count, suffix)
}
