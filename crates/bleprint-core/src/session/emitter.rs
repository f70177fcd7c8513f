use crate::ble::DiscoveryEvent;
use tokio::sync::mpsc;

/// 发现事件的唯一订阅者
#[derive(Default)]
pub(crate) struct EventEmitter {
    subscriber: Option<mpsc::UnboundedSender<DiscoveryEvent>>,
}

impl EventEmitter {
    /// 替换现有订阅者，返回是否替换了旧订阅者
    pub(crate) fn subscribe(&mut self, sink: mpsc::UnboundedSender<DiscoveryEvent>) -> bool {
        self.subscriber.replace(sink).is_some()
    }

    pub(crate) fn unsubscribe(&mut self) {
        self.subscriber = None;
    }

    pub(crate) fn is_subscribed(&self) -> bool {
        self.subscriber.as_ref().is_some_and(|s| !s.is_closed())
    }

    /// 订阅者已关闭接收端时自动注销
    pub(crate) fn emit(&mut self, event: DiscoveryEvent) -> bool {
        let Some(sink) = &self.subscriber else {
            return false;
        };
        if sink.send(event).is_ok() {
            return true;
        }
        self.subscriber = None;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(address: &str) -> DiscoveryEvent {
        DiscoveryEvent {
            name: "Unknown".into(),
            address: address.into(),
        }
    }

    #[test]
    fn test_emit_without_subscriber() {
        let mut emitter = EventEmitter::default();
        assert!(!emitter.emit(event("A")));
    }

    #[test]
    fn test_new_subscriber_replaces_old() {
        let mut emitter = EventEmitter::default();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        assert!(!emitter.subscribe(old_tx));
        assert!(emitter.subscribe(new_tx));
        assert!(emitter.emit(event("A")));

        assert_eq!(new_rx.try_recv().unwrap().address, "A");
        // 旧订阅者的发送端已被丢弃
        assert!(matches!(
            old_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_closed_subscriber_is_dropped() {
        let mut emitter = EventEmitter::default();
        let (tx, rx) = mpsc::unbounded_channel();
        emitter.subscribe(tx);
        drop(rx);

        assert!(!emitter.is_subscribed());
        assert!(!emitter.emit(event("A")));
        assert!(emitter.subscriber.is_none());
    }

    #[test]
    fn test_unsubscribe() {
        let mut emitter = EventEmitter::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        emitter.subscribe(tx);
        emitter.unsubscribe();
        assert!(!emitter.emit(event("A")));
    }
}
