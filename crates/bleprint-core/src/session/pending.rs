//! 待决请求槽 - 把异步硬件回调的结果交还给发起命令的调用方
//!
//! 同一时刻最多一个待决请求。槽已被占用时按 [`PendingPolicy`] 处理。

use crate::config::PendingPolicy;
use crate::error::{BridgeError, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

pub(crate) type Responder = oneshot::Sender<Result<bool>>;

/// 待决请求的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Scan,
    Connect,
    Print,
}

struct PendingRequest {
    kind: RequestKind,
    responder: Responder,
}

pub(crate) struct PendingSlot {
    policy: PendingPolicy,
    current: Option<PendingRequest>,
}

impl PendingSlot {
    pub(crate) fn new(policy: PendingPolicy) -> Self {
        Self {
            policy,
            current: None,
        }
    }

    /// 占用槽位
    ///
    /// `Reject` 策略下槽已被占用时把 responder 原样交还。
    /// `Overwrite` 策略下旧 responder 被丢弃，旧调用方只会看到 `RequestAbandoned`。
    pub(crate) fn occupy(
        &mut self,
        kind: RequestKind,
        responder: Responder,
    ) -> std::result::Result<(), Responder> {
        if let Some(previous) = &self.current {
            match self.policy {
                PendingPolicy::Reject => return Err(responder),
                PendingPolicy::Overwrite => warn!(
                    "Abandoning pending {:?} request in favour of {:?}",
                    previous.kind, kind
                ),
            }
        }
        self.current = Some(PendingRequest { kind, responder });
        Ok(())
    }

    /// 只在待决请求种类匹配时交付结果
    pub(crate) fn resolve(&mut self, kind: RequestKind, outcome: Result<bool>) -> bool {
        match self.current.take_if(|p| p.kind == kind) {
            Some(request) => {
                let _ = request.responder.send(outcome);
                true
            }
            None => false,
        }
    }

    /// 无论种类，以错误结束当前待决请求
    pub(crate) fn fail(&mut self, error: BridgeError) {
        if let Some(request) = self.current.take() {
            let _ = request.responder.send(Err(error));
        }
    }

    pub(crate) fn kind(&self) -> Option<RequestKind> {
        self.current.as_ref().map(|p| p.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_matches_kind() {
        let mut slot = PendingSlot::new(PendingPolicy::Overwrite);
        let (tx, mut rx) = oneshot::channel();
        assert!(slot.occupy(RequestKind::Scan, tx).is_ok());

        assert!(!slot.resolve(RequestKind::Connect, Ok(true)));
        assert_eq!(slot.kind(), Some(RequestKind::Scan));

        assert!(slot.resolve(RequestKind::Scan, Ok(true)));
        assert_eq!(rx.try_recv().unwrap(), Ok(true));
        assert_eq!(slot.kind(), None);
    }

    #[test]
    fn test_resolves_at_most_once() {
        let mut slot = PendingSlot::new(PendingPolicy::Overwrite);
        let (tx, _rx) = oneshot::channel();
        slot.occupy(RequestKind::Scan, tx).unwrap();

        assert!(slot.resolve(RequestKind::Scan, Ok(true)));
        assert!(!slot.resolve(RequestKind::Scan, Ok(true)));
    }

    #[test]
    fn test_overwrite_abandons_previous() {
        let mut slot = PendingSlot::new(PendingPolicy::Overwrite);
        let (first_tx, mut first_rx) = oneshot::channel();
        let (second_tx, mut second_rx) = oneshot::channel();

        slot.occupy(RequestKind::Connect, first_tx).unwrap();
        slot.occupy(RequestKind::Connect, second_tx).unwrap();
        slot.resolve(RequestKind::Connect, Ok(true));

        // 旧 sender 被丢弃，没有任何结果送达
        assert!(matches!(
            first_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert_eq!(second_rx.try_recv().unwrap(), Ok(true));
    }

    #[test]
    fn test_reject_returns_responder() {
        let mut slot = PendingSlot::new(PendingPolicy::Reject);
        let (first_tx, _first_rx) = oneshot::channel();
        let (second_tx, mut second_rx) = oneshot::channel();

        slot.occupy(RequestKind::Connect, first_tx).unwrap();
        let rejected = slot.occupy(RequestKind::Scan, second_tx).unwrap_err();
        rejected.send(Err(BridgeError::RequestInFlight)).unwrap();

        assert_eq!(second_rx.try_recv().unwrap(), Err(BridgeError::RequestInFlight));
        assert_eq!(slot.kind(), Some(RequestKind::Connect));
    }

    #[test]
    fn test_fail_clears_any_kind() {
        let mut slot = PendingSlot::new(PendingPolicy::Overwrite);
        let (tx, mut rx) = oneshot::channel();
        slot.occupy(RequestKind::Print, tx).unwrap();

        slot.fail(BridgeError::SessionClosed);
        assert_eq!(rx.try_recv().unwrap(), Err(BridgeError::SessionClosed));
        assert_eq!(slot.kind(), None);
    }
}
