#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tao::event::Event;
use tao::event_loop::{ControlFlow, EventLoopBuilder, EventLoopProxy};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod config;
mod mail;
mod sync;
mod tray;
mod utils;

use config::Config;
use config::crypto::TokenCipher;
use config::storage::FileTokenStore;
use mail::gmail::{GmailApiClient, GoogleAuthorizer};
use mail::{ConnectionSettings, GmailConnection};
use sync::SyncEngine;
use tray::{Indicator, IndicatorCommand, TrayCommand};

/// 退出时等待轮询任务结束的最长时间
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    // 1. 初始化日志
    init_logger()?;

    // 2. 加载配置
    let config = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("⚠️ 加载配置失败: {:#}, 使用默认配置", e);
            Config::default()
        }
    };

    tracing::info!("{} v{} 启动", config::APP_NAME, config.app.version);

    // 3. 事件循环（托盘图标只能在主线程上操作）
    let event_loop = EventLoopBuilder::<IndicatorCommand>::with_user_event().build();
    let proxy = event_loop.create_proxy();

    // 4. 创建系统托盘
    let (tray_tx, tray_rx) = mpsc::unbounded_channel::<TrayCommand>();
    let tray_handle = tray::create_tray_icon(tray_tx)?;

    // 5. 后台线程运行 Tokio（OAuth2、Gmail API、定时轮询）
    std::thread::spawn(move || run_worker(config, tray_rx, proxy));

    // 6. 主线程事件循环
    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Wait;

        if let Event::UserEvent(cmd) = event {
            match cmd {
                IndicatorCommand::Update(indicator) => {
                    if let Err(e) = tray::apply_indicator(&tray_handle, &indicator) {
                        tracing::error!("更新托盘图标失败: {:#}", e);
                    }
                }
                IndicatorCommand::Shutdown => {
                    tracing::info!("👋 退出");
                    *control_flow = ControlFlow::ExitWithCode(0);
                }
            }
        }
    })
}

/// 后台线程入口：结束时总是通知主线程退出
fn run_worker(
    config: Config,
    tray_rx: mpsc::UnboundedReceiver<TrayCommand>,
    proxy: EventLoopProxy<IndicatorCommand>,
) {
    let result = tokio::runtime::Runtime::new()
        .map_err(anyhow::Error::from)
        .and_then(|rt| rt.block_on(run_app(config, tray_rx, proxy.clone())));

    if let Err(e) = result {
        tracing::error!("❌ 后台任务异常退出: {:#}", e);
    }

    proxy.send_event(IndicatorCommand::Shutdown).ok();
}

/// 组装连接与轮询引擎，并分发托盘命令
async fn run_app(
    config: Config,
    mut tray_rx: mpsc::UnboundedReceiver<TrayCommand>,
    proxy: EventLoopProxy<IndicatorCommand>,
) -> Result<()> {
    let http = utils::http_client::build(&config.http)?;
    let store = FileTokenStore::new(config::token_store_dir()?, TokenCipher::from_machine()?);
    tracing::debug!("Token 存储目录: {}", store.dir().display());

    let connection = GmailConnection::new(
        ConnectionSettings::from(&config.oauth),
        Arc::new(GoogleAuthorizer::new(http.clone())),
        Arc::new(GmailApiClient::new(http)),
        store,
    );

    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let engine = Arc::new(SyncEngine::new(
        connection,
        config.app.poll_interval(),
        status_tx,
    ));

    let shutdown = CancellationToken::new();
    let poller = engine.start(shutdown.clone());

    // Sign Out 完成后通知退出
    let (quit_tx, mut quit_rx) = mpsc::unbounded_channel::<()>();

    loop {
        tokio::select! {
            cmd = tray_rx.recv() => {
                let Some(cmd) = cmd else { break };
                tracing::info!("处理托盘命令: {:?}", cmd);

                match cmd {
                    TrayCommand::CheckNow => {
                        let engine = engine.clone();
                        tokio::spawn(async move {
                            engine.check_now().await;
                        });
                    }
                    TrayCommand::OpenInbox => open_inbox(&config.app.inbox_url),
                    TrayCommand::SignOut => {
                        let engine = engine.clone();
                        let quit_tx = quit_tx.clone();
                        tokio::spawn(async move {
                            match engine.sign_out().await {
                                Ok(true) => {
                                    tracing::info!("✅ 已退出登录");
                                    quit_tx.send(()).ok();
                                }
                                Ok(false) => tracing::info!("尚未连接，忽略 Sign Out"),
                                Err(e) => {
                                    tracing::error!("❌ 撤销授权失败: {:#}", e);
                                    quit_tx.send(()).ok();
                                }
                            }
                        });
                    }
                    TrayCommand::Exit => break,
                }
            }
            Some(status) = status_rx.recv() => {
                let indicator = Indicator::from(status);
                if proxy.send_event(IndicatorCommand::Update(indicator)).is_err() {
                    tracing::debug!("事件循环已关闭");
                    break;
                }
            }
            _ = quit_rx.recv() => break,
        }
    }

    tracing::info!("开始优雅关机...");
    shutdown.cancel();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, poller).await.is_err() {
        tracing::warn!("⚠️ 轮询任务未在 {} 秒内结束", SHUTDOWN_TIMEOUT.as_secs());
    }

    Ok(())
}

fn open_inbox(url: &str) {
    if let Err(e) = webbrowser::open(url) {
        tracing::error!("无法打开浏览器: {}", e);
    }
}

/// 初始化日志系统
fn init_logger() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gmail_notifier=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
