//! Bleprint Core Library
//!
//! BLE 热敏打印机桥接的核心实现：扫描附近外设、连接选定的打印机、
//! 解析打印特征，并把调用方提供的字节一次写入。
//!
//! # 模块
//!
//! - **ble**: 硬件抽象 [`Central`]、btleplug 后端、外设注册表
//! - **session**: 串行化的会话状态机 [`BridgeSession`]
//! - **command**: 方法调用到会话命令的映射
//! - **protocol**: Unix socket 上的 JSON 行协议
//! - **config**: 会话设置的加载与保存
//!
//! # 使用示例
//!
//! ```ignore
//! use bleprint_core::{BridgeSession, BridgeSettings, BtleplugCentral};
//!
//! // 1. 打开蓝牙适配器并启动会话
//! let (central, events) = BtleplugCentral::new().await?;
//! let session = BridgeSession::spawn(Arc::new(central), events, BridgeSettings::load());
//!
//! // 2. 扫描 3 秒，发现的设备推送给订阅者
//! let mut discovered = session.subscribe();
//! session.start_scan().await?;
//!
//! // 3. 连接并打印
//! session.connect("AA:BB:CC:DD:EE:FF").await?;
//! session.print_bytes(vec![0x1B, 0x40]).await?;
//! ```

pub mod ble;
pub mod command;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;

// BLE re-exports
pub use ble::{
    AdapterState, BtleplugCentral, Central, CharacteristicRef, DiscoveryEvent, HardwareEvent,
    PRINT_CHAR_UUID, Peripheral, PeripheralId, PeripheralRegistry, WriteMode,
};

pub use command::{Command, Reply, dispatch};
pub use config::{BridgeSettings, PendingPolicy, WriteAck};
pub use error::{BridgeError, HardwareError};
pub use protocol::{DeviceSummary, MethodCall, MethodResponse, socket_path};
pub use session::{BridgeSession, DiscoveryStream, Pending, RequestKind, SessionStatus};
