//! Bleprint CLI
//!
//! 命令行客户端，通过 Unix Socket 与守护进程通信

mod client;

use anyhow::{Context, Result};
use bleprint_core::{Command, MethodResponse};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bleprint", version, about = "BLE 热敏打印机命令行工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 扫描附近设备 (扫描窗口由守护进程设置决定)
    Scan,
    /// 提前停止扫描
    Stop,
    /// 连接到扫描发现的设备
    Connect {
        /// 设备地址
        address: String,
    },
    /// 断开当前连接
    Disconnect,
    /// 把文件内容原样发送给打印机
    Print {
        /// 已编码好的打印数据文件
        file: PathBuf,
    },
    /// 查看当前状态
    Status,
    /// 列出本次扫描发现的设备
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan => scan().await?,
        Commands::Stop => {
            println!("⏹️  停止扫描");
            report(client::send_request(Command::StopScan).await?);
        }
        Commands::Connect { address } => {
            println!("🔗 连接到 {}...", address);
            report(client::send_request(Command::Connect { address }).await?);
        }
        Commands::Disconnect => {
            let resp = client::send_request(Command::Disconnect).await?;
            match resp {
                MethodResponse::Result { value: true } => println!("✅ 已断开连接"),
                MethodResponse::Result { value: false } => println!("   当前没有连接"),
                _ => {}
            }
        }
        Commands::Print { file } => {
            let payload = tokio::fs::read(&file)
                .await
                .with_context(|| format!("无法读取文件 {}", file.display()))?;
            println!("🖨️  发送 {} 字节: {}", payload.len(), file.display());
            report(client::send_request(Command::PrintBytes { payload }).await?);
        }
        Commands::Status => {
            let resp = client::send_request(Command::Status).await?;
            if let MethodResponse::Status(status) = resp {
                println!("适配器: {:?}", status.adapter);
                println!("扫描中: {}", if status.scanning { "是" } else { "否" });
                println!("已发现: {} 台设备", status.discovered);
                if let Some(addr) = &status.connecting {
                    println!("正在连接: {}", addr);
                }
                match &status.connected {
                    Some(addr) if status.print_ready => println!("已连接: {} (可打印)", addr),
                    Some(addr) => println!("已连接: {} (未找到打印特征)", addr),
                    None => println!("已连接: 无"),
                }
                if let Some(kind) = status.pending {
                    println!("待决请求: {:?}", kind);
                }
            }
        }
        Commands::Devices => {
            let resp = client::send_request(Command::Devices).await?;
            if let MethodResponse::Devices { devices } = resp {
                if devices.is_empty() {
                    println!("   未发现设备");
                } else {
                    for (i, dev) in devices.iter().enumerate() {
                        let rssi = dev
                            .advertisement
                            .get("rssi")
                            .map(|r| format!(" {} dBm", r))
                            .unwrap_or_default();
                        println!("   [{}] {} ({}){}", i, dev.name, dev.address, rssi);
                    }
                }
            }
        }
    }

    Ok(())
}

/// 订阅事件的同时发起扫描，扫描结束后退出
async fn scan() -> Result<()> {
    let mut subscription = client::Subscription::open().await?;
    println!("🔍 扫描设备...");

    let mut scan = tokio::spawn(client::send_request(Command::StartScan));

    let mut found = 0usize;
    loop {
        tokio::select! {
            event = subscription.next_event() => match event? {
                Some((name, address)) => {
                    println!("   [{}] {} ({})", found, name, address);
                    found += 1;
                }
                None => break,
            },
            resp = &mut scan => {
                if let MethodResponse::Result { value: true } = resp?? {
                    // 事件和扫描结果走不同的连接，以注册表为准
                    let total = match client::send_request(Command::Devices).await? {
                        MethodResponse::Devices { devices } => devices.len(),
                        _ => found,
                    };
                    if total == 0 {
                        println!("   未发现设备");
                    } else {
                        println!("✅ 共发现 {} 台设备", total);
                    }
                }
                break;
            }
        }
    }

    Ok(())
}

fn report(resp: MethodResponse) {
    if let MethodResponse::Result { value: true } = resp {
        println!("✅ 完成");
    }
}
