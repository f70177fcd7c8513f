//! 会话配置和持久化
//!
//! 设置保存在 `~/.config/bleprint/settings.toml`，文件缺失或无法解析时使用默认值。

use crate::ble::{PRINT_CHAR_UUID, SCAN_DURATION};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// 待决请求槽已被占用时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PendingPolicy {
    /// 新请求覆盖旧请求，旧调用方得到 `RequestAbandoned`
    #[default]
    Overwrite,
    /// 拒绝新请求（`RequestInFlight`）
    Reject,
}

/// 打印成功的判定时机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteAck {
    /// 写入提交即返回成功
    #[default]
    Submitted,
    /// 等待设备确认写入
    Acknowledged,
}

/// 桥接设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// 扫描窗口（毫秒），到期自动停止
    pub scan_duration_ms: u64,
    /// 打印特征 UUID
    pub print_characteristic: Uuid,
    /// 连接超时（毫秒），0 表示不限时
    pub connect_timeout_ms: u64,
    pub pending_policy: PendingPolicy,
    pub write_ack: WriteAck,
    /// 详细日志模式
    pub verbose: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            scan_duration_ms: u64::try_from(SCAN_DURATION.as_millis()).unwrap_or(3000),
            print_characteristic: PRINT_CHAR_UUID,
            connect_timeout_ms: 15_000,
            pending_policy: PendingPolicy::Overwrite,
            write_ack: WriteAck::Submitted,
            verbose: false,
        }
    }
}

impl BridgeSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bleprint");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        let path = Self::config_path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match Self::from_toml(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = BridgeSettings::default();
        assert_eq!(settings.scan_duration(), Duration::from_secs(3));
        assert_eq!(
            settings.print_characteristic.to_string(),
            "0000ff02-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(settings.pending_policy, PendingPolicy::Overwrite);
        assert_eq!(settings.write_ack, WriteAck::Submitted);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = BridgeSettings::from_toml(
            r#"
            pending_policy = "reject"
            write_ack = "acknowledged"
            "#,
        )
        .unwrap();

        assert_eq!(settings.pending_policy, PendingPolicy::Reject);
        assert_eq!(settings.write_ack, WriteAck::Acknowledged);
        assert_eq!(settings.scan_duration_ms, 3000);
        assert_eq!(settings.connect_timeout(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_toml_roundtrip() {
        let settings = BridgeSettings {
            connect_timeout_ms: 0,
            verbose: true,
            ..Default::default()
        };
        let content = toml::to_string_pretty(&settings).unwrap();
        assert!(content.contains("print_characteristic = \"0000ff02-"));
        assert_eq!(settings.connect_timeout(), None);
        assert_eq!(BridgeSettings::from_toml(&content).unwrap(), settings);
    }
}
