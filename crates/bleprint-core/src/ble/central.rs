//! 硬件抽象
//!
//! [`Central`] 的每个方法只负责提交操作，立即返回；操作结果以
//! [`HardwareEvent`] 的形式从会话创建时传入的事件通道送达。
//! 所有回调在同一个通道上串行投递。

use crate::ble::{AdapterState, CharacteristicRef, Peripheral, PeripheralId, WriteMode};
use crate::error::HardwareError;
use uuid::Uuid;

pub type HardwareResult<T> = std::result::Result<T, HardwareError>;

/// BLE 中心角色
pub trait Central: Send + Sync {
    /// 开始扫描（不过滤服务）
    fn start_scan(&self) -> HardwareResult<()>;

    fn stop_scan(&self) -> HardwareResult<()>;

    /// 结果通过 `Connected` / `ConnectFailed` 返回
    fn connect(&self, peripheral: &PeripheralId) -> HardwareResult<()>;

    fn cancel_connection(&self, peripheral: &PeripheralId) -> HardwareResult<()>;

    /// 结果通过 `ServicesDiscovered` 返回
    fn discover_services(&self, peripheral: &PeripheralId) -> HardwareResult<()>;

    /// 结果通过 `CharacteristicsDiscovered` 返回
    fn discover_characteristics(&self, peripheral: &PeripheralId, service: Uuid)
    -> HardwareResult<()>;

    /// 结果通过 `WriteCompleted` 返回
    fn write(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        data: &[u8],
        mode: WriteMode,
    ) -> HardwareResult<()>;
}

/// 硬件回调
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareEvent {
    AdapterStateChanged(AdapterState),
    PeripheralDiscovered(Peripheral),
    /// 扫描提交后被底层拒绝
    ScanFailed(HardwareError),
    Connected(PeripheralId),
    ConnectFailed {
        peripheral: PeripheralId,
        error: Option<String>,
    },
    Disconnected(PeripheralId),
    ServicesDiscovered {
        peripheral: PeripheralId,
        result: HardwareResult<Vec<Uuid>>,
    },
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: Uuid,
        result: HardwareResult<Vec<CharacteristicRef>>,
    },
    WriteCompleted {
        peripheral: PeripheralId,
        characteristic: Uuid,
        result: HardwareResult<()>,
    },
}
