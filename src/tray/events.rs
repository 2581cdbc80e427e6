// 托盘事件处理模块

use tokio::sync::mpsc;
use tray_icon::{TrayIconEvent, menu::MenuEvent, menu::MenuId};

use super::indicator::Indicator;
use super::menu::MenuIds;

/// 托盘 → 后台任务的命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayCommand {
    CheckNow,
    SignOut,
    OpenInbox,
    Exit,
}

/// 后台任务 → 主线程（托盘图标只能在事件循环线程上修改）
#[derive(Debug, Clone)]
pub enum IndicatorCommand {
    Update(Indicator),
    Shutdown,
}

/// 轮询托盘事件间隔
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

/// 运行托盘事件转发循环，接收端关闭后退出
pub fn run_event_loop(menu_ids: MenuIds, tx: mpsc::UnboundedSender<TrayCommand>) {
    let menu_channel = MenuEvent::receiver();
    let tray_channel = TrayIconEvent::receiver();

    loop {
        let mut commands = Vec::new();

        if let Ok(event) = menu_channel.try_recv() {
            commands.extend(menu_command(&event.id, &menu_ids));
        }

        if let Ok(event) = tray_channel.try_recv() {
            commands.extend(tray_command(&event));
        }

        for cmd in commands {
            tracing::debug!("托盘命令: {:?}", cmd);
            if tx.send(cmd).is_err() {
                tracing::debug!("命令接收端已关闭，托盘事件循环退出");
                return;
            }
        }

        if tx.is_closed() {
            return;
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

fn menu_command(id: &MenuId, ids: &MenuIds) -> Option<TrayCommand> {
    if *id == ids.check_now {
        Some(TrayCommand::CheckNow)
    } else if *id == ids.sign_out {
        Some(TrayCommand::SignOut)
    } else if *id == ids.exit {
        Some(TrayCommand::Exit)
    } else {
        None
    }
}

/// 双击托盘图标打开网页收件箱
fn tray_command(event: &TrayIconEvent) -> Option<TrayCommand> {
    match event {
        TrayIconEvent::DoubleClick { .. } => Some(TrayCommand::OpenInbox),
        _ => None,
    }
}
