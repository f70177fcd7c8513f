//! 集成测试 - 方法调用到硬件操作的完整流程
//!
//! 通过公开 API 驱动会话，硬件由记录写入的假实现代替。

use bleprint_core::ble::central::HardwareResult;
use bleprint_core::{
    AdapterState, BridgeSession, BridgeSettings, Central, CharacteristicRef, HardwareEvent,
    MethodCall, MethodResponse, PRINT_CHAR_UUID, Peripheral, PeripheralId, Reply, WriteMode,
    dispatch,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use uuid::Uuid;

const PRINTER_SERVICE: Uuid = Uuid::from_u128(0x0000ae30_0000_1000_8000_00805f9b34fb);

/// 只记录连接和写入的假硬件
#[derive(Default)]
struct RecordingCentral {
    connects: Mutex<Vec<String>>,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl Central for RecordingCentral {
    fn start_scan(&self) -> HardwareResult<()> {
        Ok(())
    }

    fn stop_scan(&self) -> HardwareResult<()> {
        Ok(())
    }

    fn connect(&self, peripheral: &PeripheralId) -> HardwareResult<()> {
        self.connects.lock().unwrap().push(peripheral.to_string());
        Ok(())
    }

    fn cancel_connection(&self, _peripheral: &PeripheralId) -> HardwareResult<()> {
        Ok(())
    }

    fn discover_services(&self, _peripheral: &PeripheralId) -> HardwareResult<()> {
        Ok(())
    }

    fn discover_characteristics(
        &self,
        _peripheral: &PeripheralId,
        _service: Uuid,
    ) -> HardwareResult<()> {
        Ok(())
    }

    fn write(
        &self,
        _peripheral: &PeripheralId,
        characteristic: &CharacteristicRef,
        data: &[u8],
        mode: WriteMode,
    ) -> HardwareResult<()> {
        assert_eq!(characteristic.uuid, PRINT_CHAR_UUID);
        assert_eq!(mode, WriteMode::WithResponse);
        self.writes.lock().unwrap().push(data.to_vec());
        Ok(())
    }
}

struct Bridge {
    session: BridgeSession,
    central: Arc<RecordingCentral>,
    hardware: mpsc::UnboundedSender<HardwareEvent>,
}

impl Bridge {
    async fn start() -> Self {
        let central = Arc::new(RecordingCentral::default());
        let (hardware, events) = mpsc::unbounded_channel();
        let session = BridgeSession::spawn(central.clone(), events, BridgeSettings::default());
        hardware
            .send(HardwareEvent::AdapterStateChanged(AdapterState::PoweredOn))
            .unwrap();
        Self {
            session,
            central,
            hardware,
        }
    }

    fn emit(&self, event: HardwareEvent) {
        self.hardware.send(event).unwrap();
    }

    async fn call(&self, method: &str, args: serde_json::Value) -> MethodResponse {
        match dispatch(&self.session, &MethodCall::with_args(method, args)).await {
            Reply::Response(response) => response,
            Reply::Stream(_) => panic!("{method} unexpectedly returned a stream"),
        }
    }

    /// 等待此前的事件被处理
    async fn settle(&self) {
        self.session.status().await.unwrap();
    }
}

fn ok(value: bool) -> MethodResponse {
    MethodResponse::Result { value }
}

fn error_code(response: &MethodResponse) -> &str {
    match response {
        MethodResponse::Error { code, .. } => code,
        other => panic!("expected error, got {other:?}"),
    }
}

/// 测试扫描、连接、解析特征并打印的完整流程
#[tokio::test]
async fn test_scan_connect_print_flow() {
    let bridge = Bridge::start().await;

    // 1. 订阅发现事件并开始扫描
    let mut events = match dispatch(&bridge.session, &MethodCall::new("subscribe")).await {
        Reply::Stream(stream) => stream,
        Reply::Response(r) => panic!("subscribe returned {r:?}"),
    };
    let scan = bridge.session.start_scan();
    bridge.settle().await;

    // 2. 发现 A 和 B（A 重复上报）
    for (id, name) in [("A", Some("MX06")), ("B", None), ("A", Some("MX06"))] {
        bridge.emit(HardwareEvent::PeripheralDiscovered(Peripheral::new(
            id,
            name.map(str::to_string),
        )));
    }
    bridge.settle().await;
    assert_eq!(bridge.call("stopScan", json!({})).await, ok(true));
    assert_eq!(scan.await, Ok(true));

    let first = MethodResponse::from(events.next().await.unwrap());
    assert_eq!(
        first,
        MethodResponse::Event {
            name: "MX06".into(),
            address: "A".into()
        }
    );
    assert_eq!(events.next().await.unwrap().name, "Unknown");

    match bridge.call("getDevices", serde_json::Value::Null).await {
        MethodResponse::Devices { devices } => assert_eq!(devices.len(), 2),
        other => panic!("unexpected response {other:?}"),
    }

    // 3. 连接 A，硬件报告连接成功
    let session = bridge.session.clone();
    let connect = tokio::spawn(async move {
        dispatch(
            &session,
            &MethodCall::with_args("connectToDevice", json!({"address": "A"})),
        )
        .await
    });
    bridge.settle().await;
    bridge.emit(HardwareEvent::Connected("A".into()));
    match connect.await.unwrap() {
        Reply::Response(response) => assert_eq!(response, ok(true)),
        Reply::Stream(_) => panic!("connect returned a stream"),
    }

    // 4. 服务和特征解析
    bridge.emit(HardwareEvent::ServicesDiscovered {
        peripheral: "A".into(),
        result: Ok(vec![PRINTER_SERVICE]),
    });
    bridge.emit(HardwareEvent::CharacteristicsDiscovered {
        peripheral: "A".into(),
        service: PRINTER_SERVICE,
        result: Ok(vec![CharacteristicRef::new(PRINT_CHAR_UUID, PRINTER_SERVICE)]),
    });
    bridge.settle().await;

    // 5. 打印，整个载荷只写入一次
    let payload: [u8; 6] = [0x1B, 0x40, 0x1B, 0x61, 0x01, 0x0A];
    assert_eq!(
        bridge
            .call("printImageBytes", json!({"bytes": payload}))
            .await,
        ok(true)
    );
    assert_eq!(*bridge.central.writes.lock().unwrap(), vec![payload.to_vec()]);
    assert_eq!(*bridge.central.connects.lock().unwrap(), vec!["A".to_string()]);
}

/// 测试未知设备不会触发硬件连接
#[tokio::test]
async fn test_connect_unknown_device_over_dispatch() {
    let bridge = Bridge::start().await;

    let response = bridge
        .call("connectToDevice", json!({"address": "unknown-address"}))
        .await;
    assert_eq!(error_code(&response), "DEVICE_NOT_FOUND");
    assert!(bridge.central.connects.lock().unwrap().is_empty());
}

/// 测试错误码映射
#[tokio::test]
async fn test_error_codes_over_dispatch() {
    let bridge = Bridge::start().await;

    let response = bridge.call("printImageBytes", json!({"bytes": "G0A="})).await;
    assert_eq!(error_code(&response), "NOT_CONNECTED");

    let response = bridge.call("printImageBytes", json!({})).await;
    assert_eq!(error_code(&response), "INVALID_ARGUMENTS");

    let response = bridge.call("connectToDevice", json!({})).await;
    assert_eq!(error_code(&response), "INVALID_ARGUMENTS");

    let response = bridge.call("printText", json!({"text": "hi"})).await;
    assert_eq!(error_code(&response), "NOT_IMPLEMENTED");

    assert_eq!(bridge.call("disconnectDevice", json!({})).await, ok(false));
    assert_eq!(bridge.call("unsubscribe", json!({})).await, ok(true));
}

/// 测试状态查询
#[tokio::test]
async fn test_status_over_dispatch() {
    let bridge = Bridge::start().await;

    match bridge.call("getStatus", serde_json::Value::Null).await {
        MethodResponse::Status(status) => {
            assert_eq!(status.adapter, AdapterState::PoweredOn);
            assert!(!status.scanning);
            assert_eq!(status.connected, None);
        }
        other => panic!("unexpected response {other:?}"),
    }
}

/// 测试会话关闭后的调用
#[tokio::test]
async fn test_calls_after_shutdown() {
    let bridge = Bridge::start().await;
    bridge.session.shutdown().await;

    let response = bridge.call("startScan", json!({})).await;
    assert_eq!(error_code(&response), "SESSION_CLOSED");
    assert!(bridge.session.is_closed());
}
