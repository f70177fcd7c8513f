//! 会话状态机
//!
//! 单个任务持有全部共享状态（适配器状态、注册表、扫描、连接、待决请求、订阅者），
//! 串行处理三类输入：硬件回调、内部定时器到期、调用方命令。
//! `biased` 轮询保证先于某条命令提交的硬件事件总是先被处理。

use crate::ble::{
    AdapterState, Central, CharacteristicRef, DiscoveryEvent, HardwareEvent, PRINT_WRITE_MODE,
    Peripheral, PeripheralId, PeripheralRegistry,
};
use crate::config::{BridgeSettings, WriteAck};
use crate::error::{BridgeError, HardwareError};
use crate::session::emitter::EventEmitter;
use crate::session::pending::{PendingSlot, RequestKind, Responder};
use crate::session::SessionStatus;
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub(crate) enum SessionCommand {
    StartScan(Responder),
    StopScan(Responder),
    Connect { address: String, reply: Responder },
    Disconnect(Responder),
    PrintBytes { payload: Vec<u8>, reply: Responder },
    Subscribe(mpsc::UnboundedSender<DiscoveryEvent>),
    Unsubscribe,
    Status(oneshot::Sender<SessionStatus>),
    Devices(oneshot::Sender<Vec<Peripheral>>),
    Shutdown(oneshot::Sender<()>),
}

impl SessionCommand {
    /// 命令无法投递时取回调用方的 responder
    pub(crate) fn into_responder(self) -> Option<Responder> {
        match self {
            SessionCommand::StartScan(reply)
            | SessionCommand::StopScan(reply)
            | SessionCommand::Connect { reply, .. }
            | SessionCommand::Disconnect(reply)
            | SessionCommand::PrintBytes { reply, .. } => Some(reply),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum TimerExpired {
    Scan(u64),
    Connect(u64),
}

/// 可取消的一次性定时器
///
/// 每次 arm 分配新的代号；到期消息只有在代号仍是当前代号且未被取消时才生效。
#[derive(Default)]
struct Timer {
    generation: u64,
    token: Option<CancellationToken>,
}

impl Timer {
    fn arm(
        &mut self,
        duration: Duration,
        expired: &mpsc::UnboundedSender<TimerExpired>,
        message: fn(u64) -> TimerExpired,
    ) {
        self.cancel();
        self.generation += 1;

        let generation = self.generation;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let expired = expired.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancelled.cancelled() => {}
                () = tokio::time::sleep(duration) => {
                    let _ = expired.send(message(generation));
                }
            }
        });
        self.token = Some(token);
    }

    fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }

    /// 检查并清除：只有第一次匹配的到期消息返回 `true`
    fn fire(&mut self, generation: u64) -> bool {
        if self.token.is_some() && generation == self.generation {
            self.token = None;
            true
        } else {
            false
        }
    }
}

struct Connection {
    peripheral: Peripheral,
    print_characteristic: Option<CharacteristicRef>,
    /// 尚未查询特征的服务
    unresolved: VecDeque<Uuid>,
    /// 正在等待特征回调的服务
    awaiting: Option<Uuid>,
    /// 已提交、尚未收到完成回调的写入序号（按提交顺序）
    writes_in_flight: VecDeque<u64>,
}

impl Connection {
    fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            print_characteristic: None,
            unresolved: VecDeque::new(),
            awaiting: None,
            writes_in_flight: VecDeque::new(),
        }
    }

    fn id(&self) -> &PeripheralId {
        &self.peripheral.id
    }

    fn stop_resolution(&mut self) {
        self.unresolved.clear();
        self.awaiting = None;
    }
}

pub(crate) struct SessionActor {
    central: Arc<dyn Central>,
    settings: BridgeSettings,
    adapter: AdapterState,
    registry: PeripheralRegistry,
    scanning: bool,
    scan_timer: Timer,
    connecting: Option<Peripheral>,
    connect_timer: Timer,
    connection: Option<Connection>,
    write_seq: u64,
    /// 待决打印请求等待的写入序号
    awaited_write: Option<u64>,
    pending: PendingSlot,
    emitter: EventEmitter,
    timers: mpsc::UnboundedSender<TimerExpired>,
}

impl SessionActor {
    pub(crate) fn new(
        central: Arc<dyn Central>,
        settings: BridgeSettings,
        timers: mpsc::UnboundedSender<TimerExpired>,
    ) -> Self {
        Self {
            central,
            pending: PendingSlot::new(settings.pending_policy),
            settings,
            adapter: AdapterState::Uninitialized,
            registry: PeripheralRegistry::new(),
            scanning: false,
            scan_timer: Timer::default(),
            connecting: None,
            connect_timer: Timer::default(),
            connection: None,
            write_seq: 0,
            awaited_write: None,
            emitter: EventEmitter::default(),
            timers,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut hardware: mpsc::UnboundedReceiver<HardwareEvent>,
        mut timers: mpsc::UnboundedReceiver<TimerExpired>,
    ) {
        let ack = loop {
            tokio::select! {
                biased;
                Some(event) = hardware.recv() => self.handle_hardware(event),
                Some(expired) = timers.recv() => self.handle_timer(expired),
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown(ack)) => break Some(ack),
                    Some(command) => self.handle_command(command),
                    None => break None,
                },
            }
        };

        self.teardown();
        // 关闭之后投递的命令直接失败，而不是排队后被丢弃
        drop(commands);
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        debug!("Session actor stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::StartScan(reply) => self.start_scan(reply),
            SessionCommand::StopScan(reply) => self.stop_scan(reply),
            SessionCommand::Connect { address, reply } => self.connect(&address, reply),
            SessionCommand::Disconnect(reply) => self.disconnect(reply),
            SessionCommand::PrintBytes { payload, reply } => self.print_bytes(&payload, reply),
            SessionCommand::Subscribe(sink) => {
                if self.emitter.subscribe(sink) {
                    debug!("Replaced previous discovery subscriber");
                }
            }
            SessionCommand::Unsubscribe => self.emitter.unsubscribe(),
            SessionCommand::Status(reply) => {
                let _ = reply.send(self.status());
            }
            SessionCommand::Devices(reply) => {
                let _ = reply.send(self.registry.iter().cloned().collect());
            }
            // 在 run 中处理
            SessionCommand::Shutdown(_) => {}
        }
    }

    fn handle_hardware(&mut self, event: HardwareEvent) {
        match event {
            HardwareEvent::AdapterStateChanged(state) => self.on_adapter_state(state),
            HardwareEvent::PeripheralDiscovered(peripheral) => self.on_discovered(peripheral),
            HardwareEvent::ScanFailed(error) => self.on_scan_failed(error),
            HardwareEvent::Connected(id) => self.on_connected(&id),
            HardwareEvent::ConnectFailed { peripheral, error } => {
                self.on_connect_failed(&peripheral, error);
            }
            HardwareEvent::Disconnected(id) => self.on_disconnected(&id),
            HardwareEvent::ServicesDiscovered { peripheral, result } => {
                self.on_services(&peripheral, result);
            }
            HardwareEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            } => self.on_characteristics(&peripheral, service, result),
            HardwareEvent::WriteCompleted {
                peripheral,
                characteristic,
                result,
            } => self.on_write_completed(&peripheral, characteristic, result),
        }
    }

    fn handle_timer(&mut self, expired: TimerExpired) {
        match expired {
            TimerExpired::Scan(generation) => {
                if self.scan_timer.fire(generation) {
                    info!("Scan window elapsed, stopping scan");
                    self.finish_scan(Ok(true));
                } else {
                    trace!("Ignoring stale scan timer #{}", generation);
                }
            }
            TimerExpired::Connect(generation) => {
                if !self.connect_timer.fire(generation) {
                    trace!("Ignoring stale connect timer #{}", generation);
                    return;
                }
                let Some(peripheral) = self.connecting.take() else {
                    return;
                };
                warn!("Connection to {} timed out", peripheral.display_name());
                if let Err(e) = self.central.cancel_connection(&peripheral.id) {
                    warn!("Failed to cancel connection attempt: {}", e);
                }
                self.pending.resolve(
                    RequestKind::Connect,
                    Err(BridgeError::ConnectionTimeout(
                        self.settings.connect_timeout_ms,
                    )),
                );
            }
        }
    }

    // ---- 扫描 ----

    fn start_scan(&mut self, reply: Responder) {
        if let Err(reply) = self.pending.occupy(RequestKind::Scan, reply) {
            let _ = reply.send(Err(BridgeError::RequestInFlight));
            return;
        }

        self.registry.clear();

        if !self.adapter.is_powered_on() {
            warn!("Bluetooth is not powered on ({:?})", self.adapter);
            self.pending
                .resolve(RequestKind::Scan, Err(BridgeError::AdapterUnavailable));
            return;
        }

        if self.scanning {
            debug!("Restarting active scan");
        }

        if let Err(e) = self.central.start_scan() {
            warn!("Failed to start scan: {}", e);
            self.scan_timer.cancel();
            self.scanning = false;
            self.pending.resolve(RequestKind::Scan, Err(e.into()));
            return;
        }

        self.scanning = true;
        self.scan_timer.arm(
            self.settings.scan_duration(),
            &self.timers,
            TimerExpired::Scan,
        );
        info!(
            "Scanning for devices ({} ms)...",
            self.settings.scan_duration_ms
        );
    }

    fn stop_scan(&mut self, reply: Responder) {
        if self.adapter == AdapterState::Uninitialized {
            let _ = reply.send(Err(BridgeError::AdapterNotInitialized));
            return;
        }

        // 显式停止同样结束未完成的 startScan 请求，定时器随之失效
        self.finish_scan(Ok(true));
        let _ = reply.send(Ok(true));
        info!("Stopped scanning");
    }

    fn finish_scan(&mut self, outcome: crate::error::Result<bool>) {
        self.scan_timer.cancel();
        if self.scanning {
            self.scanning = false;
            if let Err(e) = self.central.stop_scan() {
                warn!("Failed to stop scan: {}", e);
            }
            info!("Scan finished: {} device(s)", self.registry.len());
        }
        self.pending.resolve(RequestKind::Scan, outcome);
    }

    fn on_discovered(&mut self, peripheral: Peripheral) {
        if !self.scanning {
            trace!("Ignoring discovery outside scan window: {}", peripheral.id);
            return;
        }

        let event = DiscoveryEvent::from(&peripheral);
        if self.registry.insert(peripheral) {
            debug!("Discovered {} ({})", event.name, event.address);
            self.emitter.emit(event);
        }
    }

    fn on_scan_failed(&mut self, error: HardwareError) {
        if !self.scanning {
            return;
        }
        warn!("Scan failed: {}", error);
        self.scan_timer.cancel();
        self.scanning = false;
        self.pending.resolve(RequestKind::Scan, Err(error.into()));
    }

    fn on_adapter_state(&mut self, state: AdapterState) {
        let previous = std::mem::replace(&mut self.adapter, state);
        if state.is_powered_on() {
            info!("Bluetooth is ON");
        } else {
            info!("Bluetooth is not available ({:?})", state);
        }

        if !previous.is_powered_on() || state.is_powered_on() {
            return;
        }

        if self.scanning {
            self.scan_timer.cancel();
            self.scanning = false;
            self.pending
                .resolve(RequestKind::Scan, Err(BridgeError::AdapterUnavailable));
        }
        if self.connecting.take().is_some() {
            self.connect_timer.cancel();
            self.pending.resolve(
                RequestKind::Connect,
                Err(BridgeError::ConnectionFailed("Bluetooth was turned off".into())),
            );
        }
        if self.connection.take().is_some() {
            info!("Dropping connection after adapter power loss");
            self.pending
                .resolve(RequestKind::Print, Err(BridgeError::NotConnected));
        }
    }

    // ---- 连接 ----

    fn connect(&mut self, address: &str, reply: Responder) {
        let Some(peripheral) = self.registry.find(address).cloned() else {
            debug!("Device {} not found in registry", address);
            let _ = reply.send(Err(BridgeError::DeviceNotFound));
            return;
        };

        if let Err(reply) = self.pending.occupy(RequestKind::Connect, reply) {
            let _ = reply.send(Err(BridgeError::RequestInFlight));
            return;
        }

        if let Some(previous) = self.connecting.take()
            && previous.id != peripheral.id
        {
            debug!("Superseding connection attempt to {}", previous.id);
            if let Err(e) = self.central.cancel_connection(&previous.id) {
                warn!("Failed to cancel connection attempt: {}", e);
            }
        }

        info!("Connecting to {} ({})", peripheral.display_name(), peripheral.id);
        if let Err(e) = self.central.connect(&peripheral.id) {
            self.connect_timer.cancel();
            self.pending.resolve(
                RequestKind::Connect,
                Err(BridgeError::ConnectionFailed(e.to_string())),
            );
            return;
        }

        self.connecting = Some(peripheral);
        match self.settings.connect_timeout() {
            Some(timeout) => self
                .connect_timer
                .arm(timeout, &self.timers, TimerExpired::Connect),
            None => self.connect_timer.cancel(),
        }
    }

    fn on_connected(&mut self, id: &PeripheralId) {
        let Some(peripheral) = self.connecting.take_if(|p| &p.id == id) else {
            if self.connection.as_ref().is_some_and(|c| c.id() == id) {
                trace!("Duplicate connect callback for {}", id);
            } else {
                debug!("Unexpected connection to {}, cancelling", id);
                if let Err(e) = self.central.cancel_connection(id) {
                    warn!("Failed to cancel connection: {}", e);
                }
            }
            return;
        };
        self.connect_timer.cancel();

        if let Some(old) = self.connection.take()
            && old.id() != id
        {
            info!("Replacing connection to {}", old.id());
            if let Err(e) = self.central.cancel_connection(old.id()) {
                warn!("Failed to disconnect {}: {}", old.id(), e);
            }
        }

        info!("Connected to {}", peripheral.display_name());
        self.connection = Some(Connection::new(peripheral));
        self.pending.resolve(RequestKind::Connect, Ok(true));

        if let Err(e) = self.central.discover_services(id) {
            warn!("Error discovering services: {}", e);
        }
    }

    fn on_connect_failed(&mut self, id: &PeripheralId, error: Option<String>) {
        let message = error.unwrap_or_else(|| "unknown error".to_string());

        if self.connecting.take_if(|p| &p.id == id).is_some() {
            warn!("Failed to connect to {}: {}", id, message);
            self.connect_timer.cancel();
            self.pending.resolve(
                RequestKind::Connect,
                Err(BridgeError::ConnectionFailed(message)),
            );
        } else {
            debug!("Ignoring connect failure for {}: {}", id, message);
        }

        if self.connection.as_ref().is_some_and(|c| c.id() == id) {
            self.connection = None;
        }
    }

    fn on_disconnected(&mut self, id: &PeripheralId) {
        if self.connection.as_ref().is_some_and(|c| c.id() == id) {
            info!("{} disconnected", id);
            self.connection = None;
            self.pending
                .resolve(RequestKind::Print, Err(BridgeError::NotConnected));
        }
    }

    fn disconnect(&mut self, reply: Responder) {
        let Some(connection) = self.connection.take() else {
            let _ = reply.send(Ok(false));
            return;
        };

        if let Err(e) = self.central.cancel_connection(connection.id()) {
            warn!("Failed to disconnect {}: {}", connection.id(), e);
        }
        info!("Disconnected from {}", connection.peripheral.display_name());
        self.pending
            .resolve(RequestKind::Print, Err(BridgeError::NotConnected));
        let _ = reply.send(Ok(true));
    }

    // ---- 服务解析 ----

    fn on_services(&mut self, id: &PeripheralId, result: Result<Vec<Uuid>, HardwareError>) {
        let Some(connection) = self.connection.as_mut().filter(|c| c.id() == id) else {
            trace!("Ignoring services for {}", id);
            return;
        };

        match result {
            Ok(services) => {
                debug!("Discovered {} service(s) on {}", services.len(), id);
                connection.unresolved = services.into();
                self.resolve_next_service();
            }
            Err(e) => {
                warn!("Error discovering services: {}", e);
                connection.stop_resolution();
            }
        }
    }

    /// 按顺序查询下一个服务的特征
    fn resolve_next_service(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };

        if let Some(service) = connection.unresolved.pop_front() {
            match self.central.discover_characteristics(connection.id(), service) {
                Ok(()) => connection.awaiting = Some(service),
                Err(e) => {
                    warn!("Error discovering characteristics: {}", e);
                    connection.stop_resolution();
                }
            }
            return;
        }

        warn!(
            "Print characteristic {} not found on {}",
            self.settings.print_characteristic,
            connection.id()
        );
    }

    fn on_characteristics(
        &mut self,
        id: &PeripheralId,
        service: Uuid,
        result: Result<Vec<CharacteristicRef>, HardwareError>,
    ) {
        let target = self.settings.print_characteristic;
        let Some(connection) = self.connection.as_mut().filter(|c| c.id() == id) else {
            trace!("Ignoring characteristics for {}", id);
            return;
        };
        if connection.awaiting != Some(service) {
            trace!("Ignoring characteristics for service {}", service);
            return;
        }
        connection.awaiting = None;

        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(e) => {
                warn!("Error discovering characteristics: {}", e);
                connection.stop_resolution();
                return;
            }
        };

        match characteristics.into_iter().find(|c| c.uuid == target) {
            Some(found) => {
                info!("Print characteristic found in service {}", found.service);
                connection.print_characteristic = Some(found);
                connection.stop_resolution();
            }
            None => self.resolve_next_service(),
        }
    }

    // ---- 打印 ----

    fn print_bytes(&mut self, payload: &[u8], reply: Responder) {
        let Some(connection) = self.connection.as_ref() else {
            warn!("Print requested without a connected device");
            let _ = reply.send(Err(BridgeError::NotConnected));
            return;
        };
        let Some(characteristic) = connection.print_characteristic.clone() else {
            warn!("Print requested before the print characteristic was resolved");
            let _ = reply.send(Err(BridgeError::NotConnected));
            return;
        };
        if payload.is_empty() {
            warn!("Print requested with empty payload");
            let _ = reply.send(Err(BridgeError::EmptyPayload));
            return;
        }

        let id = connection.id().clone();
        info!("Sending {} bytes to printer", payload.len());

        match self.settings.write_ack {
            WriteAck::Submitted => {
                let outcome = self
                    .central
                    .write(&id, &characteristic, payload, PRINT_WRITE_MODE)
                    .map(|()| true)
                    .map_err(|e| BridgeError::WriteFailed(e.0));
                let _ = reply.send(outcome);
            }
            WriteAck::Acknowledged => {
                if let Err(reply) = self.pending.occupy(RequestKind::Print, reply) {
                    let _ = reply.send(Err(BridgeError::RequestInFlight));
                    return;
                }
                match self
                    .central
                    .write(&id, &characteristic, payload, PRINT_WRITE_MODE)
                {
                    Ok(()) => {
                        self.write_seq += 1;
                        self.awaited_write = Some(self.write_seq);
                        if let Some(connection) = self.connection.as_mut() {
                            connection.writes_in_flight.push_back(self.write_seq);
                        }
                    }
                    Err(e) => {
                        self.awaited_write = None;
                        self.pending
                            .resolve(RequestKind::Print, Err(BridgeError::WriteFailed(e.0)));
                    }
                }
            }
        }
    }

    fn on_write_completed(
        &mut self,
        id: &PeripheralId,
        characteristic: Uuid,
        result: Result<(), HardwareError>,
    ) {
        match &result {
            Ok(()) => debug!("Write to {} on {} acknowledged", characteristic, id),
            Err(e) => warn!("Write to {} on {} failed: {}", characteristic, id, e),
        }

        if self.settings.write_ack != WriteAck::Acknowledged {
            return;
        }

        // 只接受当前连接上打印特征的完成回调；完成回调与提交顺序一致
        let Some(connection) = self
            .connection
            .as_mut()
            .filter(|c| c.id() == id)
            .filter(|c| {
                c.print_characteristic
                    .as_ref()
                    .is_some_and(|p| p.uuid == characteristic)
            })
        else {
            trace!("Ignoring write completion from {}", id);
            return;
        };
        let Some(seq) = connection.writes_in_flight.pop_front() else {
            trace!("Ignoring unexpected write completion from {}", id);
            return;
        };

        if self.awaited_write.take_if(|awaited| *awaited == seq).is_some() {
            self.pending.resolve(
                RequestKind::Print,
                result
                    .map(|()| true)
                    .map_err(|e| BridgeError::WriteFailed(e.0)),
            );
        } else {
            debug!("Write #{} completed after its request was abandoned", seq);
        }
    }

    // ---- 状态与关闭 ----

    fn status(&self) -> SessionStatus {
        SessionStatus {
            adapter: self.adapter,
            scanning: self.scanning,
            discovered: self.registry.len(),
            connecting: self.connecting.as_ref().map(|p| p.id.to_string()),
            connected: self.connection.as_ref().map(|c| c.id().to_string()),
            print_ready: self
                .connection
                .as_ref()
                .is_some_and(|c| c.print_characteristic.is_some()),
            pending: self.pending.kind(),
            subscribed: self.emitter.is_subscribed(),
        }
    }

    fn teardown(&mut self) {
        self.scan_timer.cancel();
        self.connect_timer.cancel();

        if self.scanning {
            self.scanning = false;
            if let Err(e) = self.central.stop_scan() {
                warn!("Failed to stop scan: {}", e);
            }
        }
        if let Some(peripheral) = self.connecting.take()
            && let Err(e) = self.central.cancel_connection(&peripheral.id)
        {
            warn!("Failed to cancel connection attempt: {}", e);
        }
        if let Some(connection) = self.connection.take()
            && let Err(e) = self.central.cancel_connection(connection.id())
        {
            warn!("Failed to disconnect {}: {}", connection.id(), e);
        }

        self.pending.fail(BridgeError::SessionClosed);
        self.emitter.unsubscribe();
        info!("Session closed");
    }
}
