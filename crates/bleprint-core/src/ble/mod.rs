pub mod btleplug_central;
pub mod central;
mod queue;
pub mod registry;

pub use btleplug_central::BtleplugCentral;
pub use central::{Central, HardwareEvent};
pub use registry::PeripheralRegistry;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// 打印特征 UUID，打印数据写入此特征
pub const PRINT_CHAR_UUID: Uuid = Uuid::from_u128(0x0000ff02_0000_1000_8000_00805f9b34fb);

/// 扫描窗口长度，到期后自动停止扫描
pub const SCAN_DURATION: Duration = Duration::from_millis(3000);

/// 打印写入固定使用带应答写
pub const PRINT_WRITE_MODE: WriteMode = WriteMode::WithResponse;

/// 设备没有广播名称时显示的占位名
pub const UNKNOWN_NAME: &str = "Unknown";

/// 外设标识（平台相关：Linux 上是 BlueZ 路径/地址，macOS 上是 UUID）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 地址比较忽略 ASCII 大小写
    pub fn matches(&self, address: &str) -> bool {
        self.0.eq_ignore_ascii_case(address)
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeripheralId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// 扫描期间发现的外设，加入注册表后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peripheral {
    pub id: PeripheralId,
    pub name: Option<String>,
    /// 广播元数据（rssi、厂商数据等），键值由后端决定
    #[serde(default)]
    pub advertisement: BTreeMap<String, String>,
}

impl Peripheral {
    pub fn new(id: impl Into<PeripheralId>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
            advertisement: BTreeMap::new(),
        }
    }

    pub fn with_advertisement(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.advertisement.insert(key.into(), value.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(UNKNOWN_NAME)
    }
}

/// 特征引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicRef {
    pub uuid: Uuid,
    pub service: Uuid,
}

impl CharacteristicRef {
    pub fn new(uuid: Uuid, service: Uuid) -> Self {
        Self { uuid, service }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// 适配器电源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    /// 后端尚未报告任何状态
    #[default]
    Uninitialized,
    Unknown,
    PoweredOff,
    Unsupported,
    Unauthorized,
    PoweredOn,
}

impl AdapterState {
    pub fn is_powered_on(self) -> bool {
        self == AdapterState::PoweredOn
    }
}

/// 推送给订阅者的发现事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryEvent {
    pub name: String,
    pub address: String,
}

impl From<&Peripheral> for DiscoveryEvent {
    fn from(peripheral: &Peripheral) -> Self {
        Self {
            name: peripheral.display_name().to_string(),
            address: peripheral.id.to_string(),
        }
    }
}
