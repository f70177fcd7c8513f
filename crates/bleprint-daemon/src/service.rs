//! Core Service - 打开蓝牙适配器并启动会话

use anyhow::Result;
use bleprint_core::{BridgeSession, BridgeSettings, BtleplugCentral};
use std::sync::Arc;

pub async fn start_session(settings: BridgeSettings) -> Result<BridgeSession> {
    tracing::info!("核心服务初始化...");
    tracing::debug!("会话设置: {:?}", settings);

    let (central, events) = BtleplugCentral::new().await?;
    let session = BridgeSession::spawn(Arc::new(central), events, settings);

    tracing::info!("等待 IPC 命令...");
    Ok(session)
}
