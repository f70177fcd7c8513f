//! 命令表面 - 把方法调用解析为类型化命令并交给会话执行

use crate::error::{BridgeError, Result};
use crate::protocol::{DeviceSummary, MethodCall, MethodResponse};
use crate::session::{BridgeSession, DiscoveryStream};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::debug;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartScan,
    StopScan,
    Connect { address: String },
    Disconnect,
    PrintBytes { payload: Vec<u8> },
    Status,
    Devices,
    Subscribe,
    Unsubscribe,
}

impl Command {
    pub fn parse(call: &MethodCall) -> Result<Self> {
        let command = match call.method.as_str() {
            "startScan" => Command::StartScan,
            "stopScan" => Command::StopScan,
            "connectToDevice" => Command::Connect {
                address: string_arg(&call.args, "address")?,
            },
            "disconnectDevice" => Command::Disconnect,
            "printImageBytes" => Command::PrintBytes {
                payload: bytes_arg(&call.args, "bytes")?,
            },
            "getStatus" => Command::Status,
            "getDevices" => Command::Devices,
            "subscribe" => Command::Subscribe,
            "unsubscribe" => Command::Unsubscribe,
            other => return Err(BridgeError::NotImplemented(other.to_string())),
        };
        Ok(command)
    }

    /// 对应的方法名
    pub fn method(&self) -> &'static str {
        match self {
            Command::StartScan => "startScan",
            Command::StopScan => "stopScan",
            Command::Connect { .. } => "connectToDevice",
            Command::Disconnect => "disconnectDevice",
            Command::PrintBytes { .. } => "printImageBytes",
            Command::Status => "getStatus",
            Command::Devices => "getDevices",
            Command::Subscribe => "subscribe",
            Command::Unsubscribe => "unsubscribe",
        }
    }
}

impl From<Command> for MethodCall {
    fn from(command: Command) -> Self {
        let method = command.method();
        match command {
            Command::Connect { address } => {
                MethodCall::with_args(method, serde_json::json!({ "address": address }))
            }
            Command::PrintBytes { payload } => MethodCall::with_args(
                method,
                serde_json::json!({ "bytes": STANDARD.encode(payload) }),
            ),
            _ => MethodCall::new(method),
        }
    }
}

fn string_arg(args: &Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BridgeError::InvalidArguments(format!("Missing string argument '{key}'")))
}

/// 字节参数接受 base64 字符串或 0-255 的整数数组
fn bytes_arg(args: &Value, key: &str) -> Result<Vec<u8>> {
    match args.get(key) {
        Some(Value::String(encoded)) => STANDARD
            .decode(encoded)
            .map_err(|e| BridgeError::InvalidArguments(format!("Invalid base64 in '{key}': {e}"))),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| {
                        BridgeError::InvalidArguments(format!(
                            "'{key}' must contain integers in 0..=255, got {item}"
                        ))
                    })
            })
            .collect(),
        Some(other) => Err(BridgeError::InvalidArguments(format!(
            "'{key}' must be a base64 string or byte array, got {other}"
        ))),
        None => Err(BridgeError::InvalidArguments(format!(
            "Missing byte argument '{key}'"
        ))),
    }
}

/// 命令执行结果
pub enum Reply {
    Response(MethodResponse),
    /// 调用方此后应把流中的事件逐条转发
    Stream(DiscoveryStream),
}

/// 解析并执行一个方法调用
pub async fn dispatch(session: &BridgeSession, call: &MethodCall) -> Reply {
    match Command::parse(call) {
        Ok(command) => execute(session, command).await,
        Err(e) => {
            debug!("Rejected call to {}: {}", call.method, e);
            Reply::Response(MethodResponse::error(&e))
        }
    }
}

pub async fn execute(session: &BridgeSession, command: Command) -> Reply {
    let response = match command {
        Command::StartScan => MethodResponse::from_outcome(session.start_scan().await),
        Command::StopScan => MethodResponse::from_outcome(session.stop_scan().await),
        Command::Connect { address } => {
            MethodResponse::from_outcome(session.connect(address).await)
        }
        Command::Disconnect => MethodResponse::from_outcome(session.disconnect().await),
        Command::PrintBytes { payload } => {
            MethodResponse::from_outcome(session.print_bytes(payload).await)
        }
        Command::Status => match session.status().await {
            Ok(status) => MethodResponse::Status(status),
            Err(e) => MethodResponse::error(&e),
        },
        Command::Devices => match session.devices().await {
            Ok(devices) => MethodResponse::Devices {
                devices: devices.iter().map(DeviceSummary::from).collect(),
            },
            Err(e) => MethodResponse::error(&e),
        },
        Command::Subscribe => return Reply::Stream(session.subscribe()),
        Command::Unsubscribe => {
            session.unsubscribe();
            MethodResponse::Result { value: true }
        }
    };
    Reply::Response(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(method: &str, args: Value) -> Result<Command> {
        Command::parse(&MethodCall::with_args(method, args))
    }

    #[test]
    fn test_parse_simple_methods() {
        assert_eq!(parse("startScan", Value::Null), Ok(Command::StartScan));
        assert_eq!(parse("stopScan", json!({})), Ok(Command::StopScan));
        assert_eq!(parse("disconnectDevice", Value::Null), Ok(Command::Disconnect));
        assert_eq!(parse("getStatus", Value::Null), Ok(Command::Status));
    }

    #[test]
    fn test_parse_connect() {
        assert_eq!(
            parse("connectToDevice", json!({"address": "AA:BB"})),
            Ok(Command::Connect {
                address: "AA:BB".into()
            })
        );
        assert_eq!(
            parse("connectToDevice", json!({})).unwrap_err().code(),
            "INVALID_ARGUMENTS"
        );
        assert_eq!(
            parse("connectToDevice", json!({"address": 42})).unwrap_err().code(),
            "INVALID_ARGUMENTS"
        );
    }

    #[test]
    fn test_parse_bytes_base64_and_array() {
        assert_eq!(
            parse("printImageBytes", json!({"bytes": "G0A="})),
            Ok(Command::PrintBytes {
                payload: vec![0x1B, 0x40]
            })
        );
        assert_eq!(
            parse("printImageBytes", json!({"bytes": [27, 64]})),
            Ok(Command::PrintBytes {
                payload: vec![0x1B, 0x40]
            })
        );
        // 空载荷在解析阶段合法，由会话报告 EMPTY_BYTES
        assert_eq!(
            parse("printImageBytes", json!({"bytes": []})),
            Ok(Command::PrintBytes { payload: vec![] })
        );
    }

    #[test]
    fn test_parse_bytes_malformed() {
        for args in [
            json!({}),
            json!({"bytes": "not base64!"}),
            json!({"bytes": [1, 256]}),
            json!({"bytes": [-1]}),
            json!({"bytes": true}),
        ] {
            assert_eq!(
                parse("printImageBytes", args).unwrap_err().code(),
                "INVALID_ARGUMENTS"
            );
        }
    }

    #[test]
    fn test_unknown_method() {
        let err = parse("printText", Value::Null).unwrap_err();
        assert_eq!(err, BridgeError::NotImplemented("printText".into()));
        assert_eq!(err.code(), "NOT_IMPLEMENTED");
    }

    #[test]
    fn test_command_to_method_call() {
        let call = MethodCall::from(Command::PrintBytes {
            payload: vec![0x1B, 0x40],
        });
        assert_eq!(call.method, "printImageBytes");
        assert_eq!(
            Command::parse(&call),
            Ok(Command::PrintBytes {
                payload: vec![0x1B, 0x40]
            })
        );

        let call = MethodCall::from(Command::Connect {
            address: "AA:BB".into(),
        });
        assert_eq!(call.args, json!({"address": "AA:BB"}));
    }
}
