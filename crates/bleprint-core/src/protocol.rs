//! 线上协议 - Unix Domain Socket 上的 JSON 行
//!
//! 客户端每行发送一个 [`MethodCall`]，服务端每行返回一个 [`MethodResponse`]。

use crate::ble::{DiscoveryEvent, Peripheral};
use crate::error::{BridgeError, Result};
use crate::session::SessionStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("bleprint.sock")
}

/// 方法调用，参数为 JSON 对象
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Value::Null,
        }
    }

    pub fn with_args(method: impl Into<String>, args: Value) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum MethodResponse {
    #[serde(rename = "result")]
    Result { value: bool },
    #[serde(rename = "error")]
    Error { code: String, message: String },
    #[serde(rename = "status")]
    Status(SessionStatus),
    #[serde(rename = "devices")]
    Devices { devices: Vec<DeviceSummary> },
    /// 此后该连接只推送 `event`
    #[serde(rename = "subscribed")]
    Subscribed,
    #[serde(rename = "event")]
    Event { name: String, address: String },
}

impl MethodResponse {
    pub fn error(err: &BridgeError) -> Self {
        MethodResponse::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn from_outcome(outcome: Result<bool>) -> Self {
        match outcome {
            Ok(value) => MethodResponse::Result { value },
            Err(e) => Self::error(&e),
        }
    }
}

impl From<DiscoveryEvent> for MethodResponse {
    fn from(event: DiscoveryEvent) -> Self {
        MethodResponse::Event {
            name: event.name,
            address: event.address,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub name: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub advertisement: BTreeMap<String, String>,
}

impl From<&Peripheral> for DeviceSummary {
    fn from(peripheral: &Peripheral) -> Self {
        Self {
            name: peripheral.display_name().to_string(),
            address: peripheral.id.to_string(),
            advertisement: peripheral.advertisement.clone(),
        }
    }
}
