//! btleplug 硬件后端
//!
//! 把 btleplug 的 async API 适配为 [`Central`] 的"提交 + 回调"模型：
//! 提交只把操作放进队列，后台任务按提交顺序逐个执行，完成后把结果作为
//! [`HardwareEvent`] 发送到事件通道。扫描启停和外设操作各用一个队列，
//! 同一队列内的操作不会交错。

use crate::ble::central::HardwareResult;
use crate::ble::queue::spawn_serial;
use crate::ble::{
    AdapterState, Central, CharacteristicRef, HardwareEvent, Peripheral, PeripheralId, WriteMode,
};
use crate::error::{BridgeError, HardwareError};
use btleplug::api::{
    Central as _, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{
    Adapter, Manager, Peripheral as PlatformPeripheral, PeripheralId as PlatformId,
};
use futures_util::StreamExt;
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

enum ScanOperation {
    Start,
    Stop,
}

/// 已解析出平台标识的目标外设
struct Target {
    id: PeripheralId,
    platform: PlatformId,
}

enum PeripheralOperation {
    Connect(Target),
    Disconnect(Target),
    DiscoverServices(Target),
    DiscoverCharacteristics(Target, Uuid),
    Write {
        target: Target,
        characteristic: CharacteristicRef,
        data: Vec<u8>,
        write_type: WriteType,
    },
}

pub struct BtleplugCentral {
    scan_ops: mpsc::UnboundedSender<ScanOperation>,
    peripheral_ops: mpsc::UnboundedSender<PeripheralOperation>,
    /// 已发现外设的标识 -> 平台标识
    known: Arc<Mutex<HashMap<PeripheralId, PlatformId>>>,
}

impl BtleplugCentral {
    /// 打开第一个可用适配器并开始转发适配器事件
    ///
    /// 返回的接收端交给会话使用。
    pub async fn new() -> Result<(Self, mpsc::UnboundedReceiver<HardwareEvent>), BridgeError> {
        let manager = Manager::new().await.map_err(HardwareError::from)?;
        let adapters = manager.adapters().await.map_err(HardwareError::from)?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::Hardware("No Bluetooth adapters found".into()))?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter {}", info),
            Err(e) => debug!("Could not read adapter info: {}", e),
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let known = Arc::new(Mutex::new(HashMap::new()));

        let mut central_events = adapter.events().await.map_err(HardwareError::from)?;
        // 拿到适配器即视为已上电；上电失败会在扫描时以 ScanFailed 暴露
        let _ = tx.send(HardwareEvent::AdapterStateChanged(AdapterState::PoweredOn));

        let pump_adapter = adapter.clone();
        let pump_tx = tx.clone();
        let pump_known = Arc::clone(&known);
        tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                let forwarded = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        match describe_peripheral(&pump_adapter, &id).await {
                            Ok(peripheral) => {
                                lock(&pump_known).insert(peripheral.id.clone(), id);
                                Some(HardwareEvent::PeripheralDiscovered(peripheral))
                            }
                            Err(e) => {
                                trace!("Skipping peripheral {}: {}", id, e);
                                None
                            }
                        }
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        Some(HardwareEvent::Disconnected(PeripheralId::new(id.to_string())))
                    }
                    _ => None,
                };

                if let Some(event) = forwarded
                    && pump_tx.send(event).is_err()
                {
                    break;
                }
            }
            debug!("Adapter event stream ended");
        });

        let scan_adapter = adapter.clone();
        let scan_events = tx.clone();
        let scan_ops = spawn_serial(move |operation: ScanOperation| {
            let adapter = scan_adapter.clone();
            let events = scan_events.clone();
            async move { run_scan_operation(&adapter, &events, operation).await }
        });

        let peripheral_ops = spawn_serial(move |operation: PeripheralOperation| {
            let adapter = adapter.clone();
            let events = tx.clone();
            async move { run_peripheral_operation(&adapter, &events, operation).await }
        });

        Ok((
            Self {
                scan_ops,
                peripheral_ops,
                known,
            },
            rx,
        ))
    }

    fn target(&self, peripheral: &PeripheralId) -> HardwareResult<Target> {
        let platform = lock(&self.known)
            .get(peripheral)
            .cloned()
            .ok_or_else(|| HardwareError::new(format!("Unknown peripheral {peripheral}")))?;
        Ok(Target {
            id: peripheral.clone(),
            platform,
        })
    }

    fn submit_scan(&self, operation: ScanOperation) -> HardwareResult<()> {
        self.scan_ops
            .send(operation)
            .map_err(|_| HardwareError::new("Bluetooth worker stopped"))
    }

    fn submit(&self, operation: PeripheralOperation) -> HardwareResult<()> {
        self.peripheral_ops
            .send(operation)
            .map_err(|_| HardwareError::new("Bluetooth worker stopped"))
    }
}

impl Central for BtleplugCentral {
    fn start_scan(&self) -> HardwareResult<()> {
        self.submit_scan(ScanOperation::Start)
    }

    fn stop_scan(&self) -> HardwareResult<()> {
        self.submit_scan(ScanOperation::Stop)
    }

    fn connect(&self, peripheral: &PeripheralId) -> HardwareResult<()> {
        self.submit(PeripheralOperation::Connect(self.target(peripheral)?))
    }

    fn cancel_connection(&self, peripheral: &PeripheralId) -> HardwareResult<()> {
        self.submit(PeripheralOperation::Disconnect(self.target(peripheral)?))
    }

    fn discover_services(&self, peripheral: &PeripheralId) -> HardwareResult<()> {
        self.submit(PeripheralOperation::DiscoverServices(self.target(peripheral)?))
    }

    fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
    ) -> HardwareResult<()> {
        self.submit(PeripheralOperation::DiscoverCharacteristics(
            self.target(peripheral)?,
            service,
        ))
    }

    fn write(
        &self,
        peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        data: &[u8],
        mode: WriteMode,
    ) -> HardwareResult<()> {
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.submit(PeripheralOperation::Write {
            target: self.target(peripheral)?,
            characteristic: characteristic.clone(),
            data: data.to_vec(),
            write_type,
        })
    }
}

async fn run_scan_operation(
    adapter: &Adapter,
    events: &mpsc::UnboundedSender<HardwareEvent>,
    operation: ScanOperation,
) {
    match operation {
        ScanOperation::Start => {
            if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                let _ = events.send(HardwareEvent::ScanFailed(e.into()));
            }
        }
        ScanOperation::Stop => {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }
    }
}

async fn run_peripheral_operation(
    adapter: &Adapter,
    events: &mpsc::UnboundedSender<HardwareEvent>,
    operation: PeripheralOperation,
) {
    let target = match &operation {
        PeripheralOperation::Connect(target)
        | PeripheralOperation::Disconnect(target)
        | PeripheralOperation::DiscoverServices(target)
        | PeripheralOperation::DiscoverCharacteristics(target, _)
        | PeripheralOperation::Write { target, .. } => target,
    };
    let handle = match adapter.peripheral(&target.platform).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Peripheral {} is no longer available: {}", target.id, e);
            if let PeripheralOperation::Connect(target) = operation {
                let _ = events.send(HardwareEvent::ConnectFailed {
                    peripheral: target.id,
                    error: Some(e.to_string()),
                });
            }
            return;
        }
    };

    let event = match operation {
        PeripheralOperation::Connect(target) => match handle.connect().await {
            Ok(()) => HardwareEvent::Connected(target.id),
            Err(e) => HardwareEvent::ConnectFailed {
                peripheral: target.id,
                error: Some(e.to_string()),
            },
        },
        PeripheralOperation::Disconnect(target) => {
            if let Err(e) = handle.disconnect().await {
                warn!("Failed to disconnect {}: {}", target.id, e);
            }
            return;
        }
        PeripheralOperation::DiscoverServices(target) => {
            // btleplug 一次性发现全部服务及其特征，之后的特征查询读取缓存
            let result: HardwareResult<Vec<Uuid>> = match handle.discover_services().await {
                Ok(()) => Ok(handle.services().iter().map(|s| s.uuid).collect()),
                Err(e) => Err(HardwareError::from(e)),
            };
            HardwareEvent::ServicesDiscovered {
                peripheral: target.id,
                result,
            }
        }
        PeripheralOperation::DiscoverCharacteristics(target, service) => {
            HardwareEvent::CharacteristicsDiscovered {
                peripheral: target.id,
                service,
                result: characteristics_of(&handle, service),
            }
        }
        PeripheralOperation::Write {
            target,
            characteristic,
            data,
            write_type,
        } => {
            let found = handle.characteristics().into_iter().find(|c| {
                c.uuid == characteristic.uuid && c.service_uuid == characteristic.service
            });
            let result = match found {
                Some(c) => handle
                    .write(&c, &data, write_type)
                    .await
                    .map_err(HardwareError::from),
                None => Err(HardwareError::new(format!(
                    "Characteristic {} not found",
                    characteristic.uuid
                ))),
            };
            HardwareEvent::WriteCompleted {
                peripheral: target.id,
                characteristic: characteristic.uuid,
                result,
            }
        }
    };
    let _ = events.send(event);
}

fn characteristics_of(
    handle: &PlatformPeripheral,
    service: Uuid,
) -> HardwareResult<Vec<CharacteristicRef>> {
    handle
        .services()
        .into_iter()
        .find(|s| s.uuid == service)
        .map(|s| {
            s.characteristics
                .iter()
                .map(|c| CharacteristicRef::new(c.uuid, c.service_uuid))
                .collect()
        })
        .ok_or_else(|| HardwareError::new(format!("Service {service} not found")))
}

/// 读取外设属性，转换为注册表条目
async fn describe_peripheral(adapter: &Adapter, id: &PlatformId) -> btleplug::Result<Peripheral> {
    let handle = adapter.peripheral(id).await?;
    let mut peripheral = Peripheral::new(id.to_string(), None);

    if let Some(props) = handle.properties().await? {
        peripheral.name = props.local_name;
        peripheral
            .advertisement
            .insert("address".into(), props.address.to_string());
        if let Some(rssi) = props.rssi {
            peripheral.advertisement.insert("rssi".into(), rssi.to_string());
        }
        if let Some(tx_power) = props.tx_power_level {
            peripheral
                .advertisement
                .insert("tx_power".into(), tx_power.to_string());
        }
        if !props.services.is_empty() {
            let services: Vec<String> = props.services.iter().map(Uuid::to_string).collect();
            peripheral
                .advertisement
                .insert("services".into(), services.join(","));
        }
        for (company, data) in &props.manufacturer_data {
            let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
            peripheral
                .advertisement
                .insert(format!("manufacturer:0x{company:04X}"), hex);
        }
    }

    Ok(peripheral)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
