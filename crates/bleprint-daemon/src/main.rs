//! Bleprint Daemon
//!
//! 后台守护进程，负责：
//! - 持有蓝牙适配器和唯一的打印会话
//! - 通过 Unix Socket 与 CLI 通信

mod ipc;
mod service;

use anyhow::Result;
use bleprint_core::{BridgeSettings, socket_path};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = BridgeSettings::load();

    // 桥接 log crate（bleprint-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    // 初始化日志
    let default_filter = if settings.verbose {
        "debug"
    } else {
        "info,bleprint_core=debug"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();

    tracing::info!("Bleprint Daemon starting...");

    let session = service::start_session(settings).await?;

    // 启动 IPC 服务器
    let ipc_handle = tokio::spawn(ipc::run_ipc_server(session.clone()));

    tokio::select! {
        res = ipc_handle => {
            tracing::error!("IPC server exited: {:?}", res);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("收到退出信号");
        }
    }

    // 停止扫描并断开连接
    session.shutdown().await;
    let _ = std::fs::remove_file(socket_path());
    tracing::info!("Bleprint Daemon stopped");

    Ok(())
}
