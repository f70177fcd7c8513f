//! IPC Server - Unix Domain Socket 通信
//!
//! 每行一个 `MethodCall`，每行一个 `MethodResponse`。`subscribe` 之后该连接
//! 只推送发现事件，直到客户端断开或被新的订阅者替换。

use anyhow::Result;
use bleprint_core::{
    BridgeError, BridgeSession, DiscoveryStream, MethodCall, MethodResponse, Reply, dispatch,
    socket_path,
};
use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

pub async fn run_ipc_server(session: BridgeSession) -> Result<()> {
    let path = socket_path();

    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)?;
    tracing::info!("IPC 服务器已启动: {:?}", path);

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, session).await {
                        tracing::debug!("客户端连接结束: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("接受连接失败: {}", e);
            }
        }
    }
}

async fn handle_client(stream: UnixStream, session: BridgeSession) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let call: MethodCall = match serde_json::from_str(line.trim()) {
            Ok(call) => call,
            Err(e) => {
                let err = BridgeError::InvalidArguments(format!("Invalid request: {e}"));
                write_response(&mut writer, &MethodResponse::error(&err)).await?;
                line.clear();
                continue;
            }
        };
        line.clear();

        tracing::debug!("收到请求: {:?}", call.method);

        match dispatch(&session, &call).await {
            Reply::Response(response) => {
                if let MethodResponse::Error { code, message } = &response {
                    tracing::warn!("{} 失败: {} ({})", call.method, message, code);
                }
                write_response(&mut writer, &response).await?;
            }
            Reply::Stream(events) => {
                write_response(&mut writer, &MethodResponse::Subscribed).await?;
                tracing::info!("客户端已订阅发现事件");
                forward_events(events, &mut reader, &mut writer).await?;
                tracing::info!("发现事件订阅结束");
                return Ok(());
            }
        }
    }

    Ok(())
}

/// 转发发现事件，客户端断开（读到 EOF）时返回
async fn forward_events<R, W>(
    mut events: DiscoveryStream,
    reader: &mut BufReader<R>,
    writer: &mut W,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut ignored = String::new();
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => write_response(writer, &MethodResponse::from(event)).await?,
                None => return Ok(()),
            },
            read = reader.read_line(&mut ignored) => {
                if read? == 0 {
                    return Ok(());
                }
                ignored.clear();
            }
        }
    }
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &MethodResponse,
) -> Result<()> {
    writer
        .write_all(serde_json::to_string(response)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    Ok(())
}
