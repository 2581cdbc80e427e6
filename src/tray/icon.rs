// 托盘图标资源加载模块

use anyhow::Result;
use tray_icon::Icon;

use super::indicator::TrayIconState;

/// 编译时嵌入图标，与安装位置无关
const ICON_ON: &[u8] = include_bytes!("../../assets/icons/mail-on.png");
const ICON_OFF: &[u8] = include_bytes!("../../assets/icons/mail-off.png");

/// 按状态加载托盘图标
pub fn load_icon(state: TrayIconState) -> Result<Icon> {
    let bytes = match state {
        TrayIconState::On => ICON_ON,
        TrayIconState::Off => ICON_OFF,
    };

    let (rgba, width, height) = decode_rgba(bytes)?;

    Icon::from_rgba(rgba, width, height).map_err(|e| anyhow::anyhow!("图标创建失败: {:?}", e))
}

/// 解码为 RGBA 像素
fn decode_rgba(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let img = image::load_from_memory(bytes).map_err(|e| anyhow::anyhow!("图标解码失败: {}", e))?;

    let rgba = img.into_rgba8();
    let (width, height) = rgba.dimensions();
    Ok((rgba.into_raw(), width, height))
}
