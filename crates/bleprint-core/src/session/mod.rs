//! BLE 会话
//!
//! [`BridgeSession`] 是会话的句柄，可以克隆后在任意任务中使用。
//! 所有状态由后台 actor 任务独占，句柄只负责投递命令。
//!
//! # 命令与结果
//!
//! 每个命令在调用时立即投递，返回的 [`Pending`] 在结果可用时完成：
//!
//! - `start_scan`：扫描窗口到期（或被显式停止）后返回 `true`
//! - `connect`：连接回调到达后返回 `true`，之后自动解析服务和打印特征
//! - `stop_scan` / `disconnect` / `print_bytes`：actor 处理命令时立即给出结果
//!
//! ```ignore
//! let (central, events) = BtleplugCentral::new().await?;
//! let session = BridgeSession::spawn(Arc::new(central), events, BridgeSettings::load());
//!
//! let mut discovered = session.subscribe();
//! session.start_scan().await?;
//! session.connect("AA:BB:CC:DD:EE:FF").await?;
//! session.print_bytes(vec![0x1B, 0x40]).await?;
//! ```

mod actor;
mod emitter;
mod pending;


pub use pending::RequestKind;

use crate::ble::{AdapterState, Central, DiscoveryEvent, HardwareEvent, Peripheral};
use crate::config::BridgeSettings;
use crate::error::{BridgeError, Result};
use actor::{SessionActor, SessionCommand};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// 发现事件流，被新的订阅者替换或会话关闭时结束
pub type DiscoveryStream = UnboundedReceiverStream<DiscoveryEvent>;

/// 会话状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub adapter: AdapterState,
    pub scanning: bool,
    pub discovered: usize,
    pub connecting: Option<String>,
    pub connected: Option<String>,
    /// 已连接且找到了打印特征
    pub print_ready: bool,
    pub pending: Option<RequestKind>,
    pub subscribed: bool,
}

/// 尚未完成的命令结果
///
/// 待决请求被新请求覆盖时以 [`BridgeError::RequestAbandoned`] 完成。
#[must_use = "the outcome of a command is only observable by awaiting it"]
pub struct Pending {
    rx: oneshot::Receiver<Result<bool>>,
}

impl Future for Pending {
    type Output = Result<bool>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(BridgeError::RequestAbandoned)))
    }
}

#[derive(Clone)]
pub struct BridgeSession {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl BridgeSession {
    /// 启动会话 actor
    ///
    /// `hardware` 是 `central` 投递回调的通道。所有句柄被丢弃或调用
    /// [`BridgeSession::shutdown`] 后，actor 停止扫描、断开连接并退出。
    pub fn spawn(
        central: Arc<dyn Central>,
        hardware: mpsc::UnboundedReceiver<HardwareEvent>,
        settings: BridgeSettings,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers_rx) = mpsc::unbounded_channel();

        let actor = SessionActor::new(central, settings, timers_tx);
        tokio::spawn(actor.run(commands_rx, hardware, timers_rx));

        Self {
            commands: commands_tx,
        }
    }

    /// 开始扫描，扫描窗口结束后完成
    pub fn start_scan(&self) -> Pending {
        self.request(SessionCommand::StartScan)
    }

    pub fn stop_scan(&self) -> Pending {
        self.request(SessionCommand::StopScan)
    }

    /// 连接到本次扫描发现的设备
    pub fn connect(&self, address: impl Into<String>) -> Pending {
        let address = address.into();
        self.request(|reply| SessionCommand::Connect { address, reply })
    }

    /// 有连接并已断开时返回 `true`，没有连接时返回 `false`
    pub fn disconnect(&self) -> Pending {
        self.request(SessionCommand::Disconnect)
    }

    /// 把整个载荷一次写入打印特征
    pub fn print_bytes(&self, payload: impl Into<Vec<u8>>) -> Pending {
        let payload = payload.into();
        self.request(|reply| SessionCommand::PrintBytes { payload, reply })
    }

    /// 订阅发现事件，替换之前的订阅者
    pub fn subscribe(&self) -> DiscoveryStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.commands.send(SessionCommand::Subscribe(tx));
        UnboundedReceiverStream::new(rx)
    }

    pub fn unsubscribe(&self) {
        let _ = self.commands.send(SessionCommand::Unsubscribe);
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Status(tx))
            .map_err(|_| BridgeError::SessionClosed)?;
        rx.await.map_err(|_| BridgeError::SessionClosed)
    }

    /// 当前注册表中的设备（按发现顺序）
    pub async fn devices(&self) -> Result<Vec<Peripheral>> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Devices(tx))
            .map_err(|_| BridgeError::SessionClosed)?;
        rx.await.map_err(|_| BridgeError::SessionClosed)
    }

    /// 停止会话，等待 actor 完成清理
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(SessionCommand::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn request(&self, build: impl FnOnce(pending::Responder) -> SessionCommand) -> Pending {
        let (tx, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(command)) = self.commands.send(build(tx))
            && let Some(reply) = command.into_responder()
        {
            let _ = reply.send(Err(BridgeError::SessionClosed));
        }
        Pending { rx }
    }
}
