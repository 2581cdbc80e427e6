// 托盘右键菜单模块

use anyhow::Result;
use tray_icon::menu::{Menu, MenuId, MenuItem, PredefinedMenuItem};

pub struct MenuIds {
    pub check_now: MenuId,
    pub sign_out: MenuId,
    pub exit: MenuId,
}

/// 菜单：Check Now / Sign Out / 分隔线 / Exit
pub fn create_menu_with_ids() -> Result<(Menu, MenuIds)> {
    let menu = Menu::new();

    let check_now = MenuItem::new("Check Now", true, None);
    let sign_out = MenuItem::new("Sign Out", true, None);
    let exit = MenuItem::new("Exit", true, None);

    menu.append_items(&[
        &check_now,
        &sign_out,
        &PredefinedMenuItem::separator(),
        &exit,
    ])?;

    let ids = MenuIds {
        check_now: check_now.id().clone(),
        sign_out: sign_out.id().clone(),
        exit: exit.id().clone(),
    };

    Ok((menu, ids))
}
