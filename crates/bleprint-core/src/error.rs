//! 错误类型
//!
//! 每个命令的失败都只作用于发起它的调用方，通过 [`BridgeError::code`]
//! 映射为稳定的线上错误码。

/// 命令级错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("Bluetooth is not powered on")]
    AdapterUnavailable,

    #[error("Bluetooth manager is not initialized")]
    AdapterNotInitialized,

    #[error("Device not found")]
    DeviceNotFound,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timed out after {0} ms")]
    ConnectionTimeout(u64),

    #[error("Not connected to a device")]
    NotConnected,

    #[error("No data to print")]
    EmptyPayload,

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Method not implemented: {0}")]
    NotImplemented(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Another request is already in flight")]
    RequestInFlight,

    #[error("Request was abandoned before it resolved")]
    RequestAbandoned,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Hardware error: {0}")]
    Hardware(String),
}

impl BridgeError {
    /// 线上协议使用的错误码
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::AdapterUnavailable => "BLUETOOTH_OFF",
            BridgeError::AdapterNotInitialized => "BLUETOOTH_NOT_INITIALIZED",
            BridgeError::DeviceNotFound => "DEVICE_NOT_FOUND",
            BridgeError::ConnectionFailed(_) => "CONNECTION_FAILED",
            BridgeError::ConnectionTimeout(_) => "CONNECTION_TIMEOUT",
            BridgeError::NotConnected => "NOT_CONNECTED",
            BridgeError::EmptyPayload => "EMPTY_BYTES",
            BridgeError::InvalidArguments(_) => "INVALID_ARGUMENTS",
            BridgeError::NotImplemented(_) => "NOT_IMPLEMENTED",
            BridgeError::WriteFailed(_) => "WRITE_FAILED",
            BridgeError::RequestInFlight => "REQUEST_IN_FLIGHT",
            BridgeError::RequestAbandoned => "REQUEST_ABANDONED",
            BridgeError::SessionClosed => "SESSION_CLOSED",
            BridgeError::Hardware(_) => "HARDWARE_ERROR",
        }
    }
}

/// 硬件层提交或回调报告的错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HardwareError(pub String);

impl HardwareError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<btleplug::Error> for HardwareError {
    fn from(err: btleplug::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<HardwareError> for BridgeError {
    fn from(err: HardwareError) -> Self {
        BridgeError::Hardware(err.0)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(BridgeError::AdapterUnavailable.code(), "BLUETOOTH_OFF");
        assert_eq!(BridgeError::EmptyPayload.code(), "EMPTY_BYTES");
        assert_eq!(
            BridgeError::ConnectionFailed("timeout".into()).code(),
            "CONNECTION_FAILED"
        );
    }

    #[test]
    fn test_connection_failed_carries_description() {
        let err = BridgeError::ConnectionFailed("Peer removed pairing information".into());
        assert_eq!(
            err.to_string(),
            "Connection failed: Peer removed pairing information"
        );
    }
}
