/// 邮件轮询引擎
///
/// 连接成功后立即检查一次，之后按固定间隔检查；"立即检查"命令走同一条路径。
/// 同一时刻最多只有一次检查在进行。
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::mail::GmailConnection;

/// 一次检查的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboxStatus {
    pub unread: u32,
    pub has_unread: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Updated(InboxStatus),
    NotConnected,
    /// 上一次检查尚未结束
    Skipped,
    Failed(String),
}

/// 检查进行中标志，离开作用域时自动清除
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 轮询引擎
pub struct SyncEngine {
    connection: Mutex<GmailConnection>,
    interval: Duration,
    in_flight: AtomicBool,
    status_tx: mpsc::UnboundedSender<InboxStatus>,
}

impl SyncEngine {
    /// 创建轮询引擎
    ///
    /// # Arguments
    /// * `interval` - 轮询间隔
    /// * `status_tx` - 每次成功检查后发送结果
    pub fn new(
        connection: GmailConnection,
        interval: Duration,
        status_tx: mpsc::UnboundedSender<InboxStatus>,
    ) -> Self {
        Self {
            connection: Mutex::new(connection),
            interval,
            in_flight: AtomicBool::new(false),
            status_tx,
        }
    }

    /// 启动：先连接，成功后进入定时轮询，直到 `cancel` 被触发
    ///
    /// 连接失败时记录错误并结束，本次运行保持未连接状态
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = self.clone();

        tokio::spawn(async move {
            if let Err(e) = engine.connect(&cancel).await {
                tracing::error!("❌ 连接 Gmail 失败，保持未连接状态: {:#}", e);
                return;
            }
            engine.run(cancel).await;
        })
    }

    pub async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        self.connection.lock().await.connect(cancel).await
    }

    #[cfg(test)]
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_connected()
    }

    /// 定时轮询循环（第一次 tick 立即触发）
    pub async fn run(&self, cancel: CancellationToken) {
        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("🚀 启动轮询（间隔: {} 秒）", self.interval.as_secs());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("🛑 轮询已停止");
                    break;
                }
                _ = timer.tick() => {
                    self.check_now().await;
                }
            }
        }
    }

    /// 立即检查一次
    ///
    /// 网络或 API 错误只记录日志，不影响下一次检查
    pub async fn check_now(&self) -> CheckOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            tracing::debug!("上一次检查尚未完成，跳过本次");
            return CheckOutcome::Skipped;
        };

        let mut connection = self.lock_connection("检查").await;
        if !connection.is_connected() {
            tracing::debug!("未连接，跳过检查");
            return CheckOutcome::NotConnected;
        }

        tracing::info!("⏰ 开始检查未读邮件...");

        match connection.check_messages().await {
            Ok(has_unread) => {
                let status = InboxStatus {
                    unread: connection.mail_count(),
                    has_unread,
                };
                tracing::info!("✅ 未读 {} 封", status.unread);
                self.status_tx.send(status).ok();
                CheckOutcome::Updated(status)
            }
            Err(e) => {
                tracing::error!("❌ 检查未读邮件失败: {:#}", e);
                CheckOutcome::Failed(e.to_string())
            }
        }
    }

    /// 获取连接；启动时的交互式授权会一直占用连接直到完成、超时或取消
    async fn lock_connection(&self, action: &str) -> MutexGuard<'_, GmailConnection> {
        match self.connection.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::info!("⏳ 正在连接 Gmail，{}将在连接结束后执行", action);
                self.connection.lock().await
            }
        }
    }

    /// 退出登录
    ///
    /// # Returns
    /// 未连接时返回 `Ok(false)`，不做任何操作
    pub async fn sign_out(&self) -> Result<bool> {
        let mut connection = self.lock_connection("退出登录").await;
        if !connection.is_connected() {
            return Ok(false);
        }
        connection.disconnect().await?;
        Ok(true)
    }
}
