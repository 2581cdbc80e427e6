// 系统托盘模块

use anyhow::Result;
use tokio::sync::mpsc;
use tray_icon::{TrayIcon, TrayIconBuilder};

mod events;
mod icon;
pub mod indicator;
mod menu;

pub use events::{IndicatorCommand, TrayCommand};
pub use indicator::Indicator;

/// 创建系统托盘图标（必须在事件循环线程上调用，TrayIcon 不是 Send）
///
/// 初始为未连接状态：off 图标，提示文字为应用名
pub fn create_tray_icon(tx: mpsc::UnboundedSender<TrayCommand>) -> Result<TrayIcon> {
    // 1. 加载图标
    let initial = Indicator::disconnected();
    let icon = icon::load_icon(initial.state)?;

    // 2. 创建菜单
    let (menu, menu_ids) = menu::create_menu_with_ids()?;

    // 3. 构建托盘图标
    let tray = TrayIconBuilder::new()
        .with_menu(Box::new(menu))
        .with_tooltip(&initial.tooltip)
        .with_icon(icon)
        .build()?;

    tracing::info!("系统托盘图标已创建");

    // 4. 启动事件循环
    std::thread::spawn(move || {
        tracing::debug!("托盘事件循环已启动");
        events::run_event_loop(menu_ids, tx);
    });

    Ok(tray)
}

/// 更新托盘图标和提示文字
pub fn apply_indicator(tray: &TrayIcon, indicator: &Indicator) -> Result<()> {
    let icon = icon::load_icon(indicator.state)?;
    tray.set_icon(Some(icon))?;
    tray.set_tooltip(Some(&indicator.tooltip))?;

    tracing::debug!("托盘已更新: {:?} / {}", indicator.state, indicator.tooltip);
    Ok(())
}
