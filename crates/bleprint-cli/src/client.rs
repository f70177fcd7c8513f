//! IPC Client - 与守护进程通信

use anyhow::{Result, bail};
use bleprint_core::{Command, MethodCall, MethodResponse, socket_path};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Connection {
    async fn open() -> Result<Self> {
        let path = socket_path();

        let stream = match UnixStream::connect(&path).await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ 无法连接到守护进程: {}", e);
                eprintln!("   请确保 bleprint-daemon 正在运行");
                eprintln!("   运行: cargo xtask dev 或 systemctl --user start bleprint");
                return Err(e.into());
            }
        };

        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    async fn send(&mut self, call: &MethodCall) -> Result<()> {
        let json = serde_json::to_string(call)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    async fn next_response(&mut self) -> Result<Option<MethodResponse>> {
        match self.lines.next_line().await? {
            Some(line) => Ok(Some(serde_json::from_str(&line)?)),
            None => Ok(None),
        }
    }
}

pub async fn send_request(command: Command) -> Result<MethodResponse> {
    let mut conn = Connection::open().await?;

    // 发送请求
    conn.send(&MethodCall::from(command)).await?;

    // 读取响应
    let Some(response) = conn.next_response().await? else {
        bail!("守护进程关闭了连接");
    };

    if let MethodResponse::Error { code, message } = &response {
        eprintln!("❌ {} ({})", message, code);
    }

    Ok(response)
}

/// 订阅发现事件的连接
pub struct Subscription {
    conn: Connection,
}

impl Subscription {
    pub async fn open() -> Result<Self> {
        let mut conn = Connection::open().await?;
        conn.send(&MethodCall::from(Command::Subscribe)).await?;

        match conn.next_response().await? {
            Some(MethodResponse::Subscribed) => Ok(Self { conn }),
            Some(other) => bail!("订阅失败: {:?}", other),
            None => bail!("守护进程关闭了连接"),
        }
    }

    /// 下一个发现事件 (名称, 地址)，订阅结束时返回 `None`
    pub async fn next_event(&mut self) -> Result<Option<(String, String)>> {
        loop {
            match self.conn.next_response().await? {
                Some(MethodResponse::Event { name, address }) => {
                    return Ok(Some((name, address)));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
    }
}
