//! Correlation-id request/response transport to the background executor.
//!
//! Every request gets a fresh id and an entry in the pending table. Replies
//! are matched purely by id, so they may arrive in any order. The table is
//! only touched by the thread that owns the bridge.

pub mod endpoint;
pub mod message;

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::BridgeError;

pub use endpoint::{Endpoint, Received};
pub use message::{
    Action, CorrelationId, Failure, FailureKind, LoadRequest, Message, Payload, ERROR_KIND,
    READY_KIND,
};

/// A request awaiting its response.
struct PendingRequest {
    action: Action,
    resolve: Sender<Message>,
}

/// Handle returned by [`MessageBridge::send`]; redeem with [`MessageBridge::wait`].
///
/// Dropping it unredeemed abandons the request: its pending entry is
/// removed on the bridge's next `send`, `wait` or `poll`.
#[derive(Debug)]
pub struct PendingReply {
    id: CorrelationId,
    action: Action,
    rx: Receiver<Message>,
    dropped: Sender<CorrelationId>,
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        // Ids of already resolved requests are no-ops when swept
        let _ = self.dropped.send(self.id);
    }
}

impl PendingReply {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub fn action(&self) -> Action {
        self.action
    }

    fn accept(&self, msg: Message) -> Result<Payload, BridgeError> {
        if msg.kind == self.action.response_kind() || msg.kind == ERROR_KIND {
            Ok(msg.payload)
        } else {
            Err(BridgeError::UnexpectedResponse {
                expected: self.action.response_kind(),
                got: msg.kind,
            })
        }
    }
}

/// Controller side of the executor protocol.
pub struct MessageBridge {
    endpoint: Endpoint,
    pending: HashMap<CorrelationId, PendingRequest>,
    ready: bool,
    dropped_tx: Sender<CorrelationId>,
    dropped_rx: Receiver<CorrelationId>,
}

impl MessageBridge {
    pub fn new(endpoint: Endpoint) -> Self {
        let (dropped_tx, dropped_rx) = mpsc::channel();
        Self {
            endpoint,
            pending: HashMap::new(),
            ready: false,
            dropped_tx,
            dropped_rx,
        }
    }

    /// Whether the executor's `ready` notification has been processed.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Issue a request. Fails immediately if the executor is not ready yet.
    pub fn send(&mut self, action: Action, payload: Payload) -> Result<PendingReply, BridgeError> {
        if !self.ready {
            return Err(BridgeError::NotReady {
                kind: action.request_kind(),
            });
        }
        self.sweep_dropped();

        let id = Uuid::new_v4();
        let (resolve, rx) = mpsc::channel();
        self.pending.insert(id, PendingRequest { action, resolve });

        if !self.endpoint.send(Message::request(action, payload, id)) {
            self.pending.remove(&id);
            return Err(BridgeError::ExecutorGone);
        }
        log::debug!("Sent '{}' ({})", action.request_kind(), id);

        Ok(PendingReply {
            id,
            action,
            rx,
            dropped: self.dropped_tx.clone(),
        })
    }

    /// Block until `reply` resolves, handling any other traffic meanwhile.
    ///
    /// On timeout the request is dropped from the pending table; a late
    /// response is then treated as unmatched.
    pub fn wait(&mut self, reply: PendingReply, timeout: Duration) -> Result<Payload, BridgeError> {
        self.sweep_dropped();
        let deadline = Instant::now() + timeout;
        loop {
            match reply.rx.try_recv() {
                Ok(msg) => return reply.accept(msg),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => return Err(BridgeError::ExecutorGone),
            }

            let now = Instant::now();
            if now >= deadline {
                self.pending.remove(&reply.id);
                log::warn!(
                    "'{}' ({}) timed out after {}ms",
                    reply.action.request_kind(),
                    reply.id,
                    timeout.as_millis()
                );
                return Err(BridgeError::Timeout {
                    kind: reply.action.request_kind(),
                    waited: timeout,
                });
            }

            match self.endpoint.recv_timeout(deadline - now) {
                Received::Message(msg) => self.dispatch(msg),
                Received::Empty => {}
                Received::Closed => {
                    self.pending.remove(&reply.id);
                    return Err(BridgeError::ExecutorGone);
                }
            }
        }
    }

    /// Send and wait in one step.
    pub fn request(
        &mut self,
        action: Action,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, BridgeError> {
        let reply = self.send(action, payload)?;
        self.wait(reply, timeout)
    }

    /// Process everything already queued without blocking.
    /// Returns the number of messages handled.
    pub fn poll(&mut self) -> Result<usize, BridgeError> {
        self.sweep_dropped();
        let mut handled = 0;
        loop {
            match self.endpoint.try_recv() {
                Received::Message(msg) => {
                    self.dispatch(msg);
                    handled += 1;
                }
                Received::Empty => return Ok(handled),
                Received::Closed => return Err(BridgeError::ExecutorGone),
            }
        }
    }

    /// Wait for the executor's `ready` notification.
    pub fn wait_ready(&mut self, timeout: Duration) -> Result<(), BridgeError> {
        let deadline = Instant::now() + timeout;
        while !self.ready {
            let now = Instant::now();
            if now >= deadline {
                return Err(BridgeError::Timeout {
                    kind: READY_KIND,
                    waited: timeout,
                });
            }
            match self.endpoint.recv_timeout(deadline - now) {
                Received::Message(msg) => self.dispatch(msg),
                Received::Empty => {}
                Received::Closed => return Err(BridgeError::ExecutorGone),
            }
        }
        Ok(())
    }

    /// Forget requests whose reply handle was dropped without `wait`.
    fn sweep_dropped(&mut self) {
        while let Ok(id) = self.dropped_rx.try_recv() {
            if let Some(pending) = self.pending.remove(&id) {
                log::debug!("Abandoned '{}' ({})", pending.action.request_kind(), id);
            }
        }
    }

    fn dispatch(&mut self, msg: Message) {
        let Some(id) = msg.id else {
            if msg.kind == READY_KIND {
                if self.ready {
                    log::warn!("Duplicate ready notification ignored");
                } else {
                    self.ready = true;
                    log::info!("Executor ready");
                }
            } else {
                log::warn!("Dropping notification '{}' without correlation id", msg.kind);
            }
            return;
        };

        match self.pending.remove(&id) {
            Some(pending) => {
                log::debug!("Resolved '{}' ({})", pending.action.request_kind(), id);
                if pending.resolve.send(msg).is_err() {
                    log::debug!("Reply {} arrived after its handle was dropped", id);
                }
            }
            None => log::warn!("Unmatched response '{}' ({}), dropping", msg.kind, id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::MetricValue;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::thread;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn scalar(payload: &Payload) -> f64 {
        match payload {
            Payload::MetricValue(MetricValue::Scalar(v)) => *v,
            other => panic!("unexpected payload {:?}", other),
        }
    }

    fn ready_bridge() -> (MessageBridge, Endpoint) {
        let (controller, executor) = Endpoint::pair();
        let mut bridge = MessageBridge::new(controller);
        executor.send(Message::ready());
        bridge.wait_ready(TIMEOUT).unwrap();
        (bridge, executor)
    }

    #[test]
    fn test_send_before_ready_fails() {
        let (controller, executor) = Endpoint::pair();
        let mut bridge = MessageBridge::new(controller);
        let err = bridge.send(Action::LoadAudio, Payload::Empty).unwrap_err();
        assert_eq!(err, BridgeError::NotReady { kind: "loadAudio" });
        assert_eq!(bridge.pending_count(), 0);
        // Nothing was transmitted
        assert!(matches!(executor.try_recv(), Received::Empty));
    }

    #[test]
    fn test_ready_flips_once() {
        let (controller, executor) = Endpoint::pair();
        let mut bridge = MessageBridge::new(controller);
        assert!(!bridge.is_ready());
        executor.send(Message::ready());
        executor.send(Message::ready());
        assert_eq!(bridge.poll().unwrap(), 2);
        assert!(bridge.is_ready());
    }

    #[test]
    fn test_wait_ready_times_out() {
        let (controller, _executor) = Endpoint::pair();
        let mut bridge = MessageBridge::new(controller);
        let err = bridge.wait_ready(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { kind: READY_KIND, .. }));
    }

    #[test]
    fn test_out_of_order_replies_pair_correctly() {
        const K: usize = 32;
        let (mut bridge, executor) = ready_bridge();

        let worker = thread::spawn(move || {
            let mut requests: Vec<Message> = (0..K).filter_map(|_| executor.recv()).collect();
            requests.shuffle(&mut StdRng::seed_from_u64(7));
            for req in &requests {
                let value = scalar(&req.payload);
                let kind = Action::GetDerivedMetric.response_kind();
                let payload = Payload::MetricValue(MetricValue::Scalar(value * 10.0));
                executor.send(req.reply(kind, payload));
            }
            executor
        });

        let replies: Vec<(f64, PendingReply)> = (0..K)
            .map(|i| {
                let payload = Payload::MetricValue(MetricValue::Scalar(i as f64));
                (i as f64, bridge.send(Action::GetDerivedMetric, payload).unwrap())
            })
            .collect();
        assert_eq!(bridge.pending_count(), K);

        let mut resolved = 0;
        // Redeem in reverse issue order
        for (sent, reply) in replies.into_iter().rev() {
            let payload = bridge.wait(reply, TIMEOUT).unwrap();
            assert_eq!(scalar(&payload), sent * 10.0);
            resolved += 1;
        }
        assert_eq!(resolved, K);
        assert_eq!(bridge.pending_count(), 0);
        worker.join().unwrap();
    }

    #[test]
    fn test_unmatched_response_is_dropped() {
        let (mut bridge, executor) = ready_bridge();
        let stray = Message {
            kind: "loadAudioResult".into(),
            payload: Payload::Ack(true),
            id: Some(Uuid::new_v4()),
        };
        executor.send(stray);
        assert_eq!(bridge.poll().unwrap(), 1);
        assert_eq!(bridge.pending_count(), 0);

        // Still usable afterwards
        let reply = bridge.send(Action::UnloadAudio, Payload::Empty).unwrap();
        let req = executor.recv().unwrap();
        executor.send(req.reply("unloadAudioResult", Payload::Ack(true)));
        assert!(matches!(bridge.wait(reply, TIMEOUT).unwrap(), Payload::Ack(true)));
    }

    #[test]
    fn test_duplicate_response_resolves_once() {
        let (mut bridge, executor) = ready_bridge();
        let reply = bridge.send(Action::UnloadAudio, Payload::Empty).unwrap();
        let req = executor.recv().unwrap();
        executor.send(req.reply("unloadAudioResult", Payload::Ack(true)));
        executor.send(req.reply("unloadAudioResult", Payload::Ack(false)));

        assert!(matches!(bridge.wait(reply, TIMEOUT).unwrap(), Payload::Ack(true)));
        // The duplicate is consumed as an unmatched message
        assert_eq!(bridge.poll().unwrap(), 1);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn test_timeout_removes_pending() {
        let (mut bridge, executor) = ready_bridge();
        let reply = bridge.send(Action::GetMetadata, Payload::Empty).unwrap();
        let err = bridge.wait(reply, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { kind: "getMetadata", .. }));
        assert_eq!(bridge.pending_count(), 0);

        // A late reply is harmless
        let req = executor.recv().unwrap();
        executor.send(req.reply("getMetadataResult", Payload::Empty));
        assert_eq!(bridge.poll().unwrap(), 1);
    }

    #[test]
    fn test_dropped_reply_is_forgotten() {
        let (mut bridge, executor) = ready_bridge();
        let kept = bridge.send(Action::UnloadAudio, Payload::Empty).unwrap();
        drop(bridge.send(Action::GetMetadata, Payload::Empty).unwrap());
        assert_eq!(bridge.pending_count(), 2);

        assert_eq!(bridge.poll().unwrap(), 0);
        assert_eq!(bridge.pending_count(), 1);

        // The executor still answers both; only the kept one resolves
        let unload = executor.recv().unwrap();
        let metadata = executor.recv().unwrap();
        executor.send(metadata.reply("getMetadataResult", Payload::Empty));
        executor.send(unload.reply("unloadAudioResult", Payload::Ack(true)));
        assert!(matches!(bridge.wait(kept, TIMEOUT).unwrap(), Payload::Ack(true)));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn test_wrong_response_kind() {
        let (mut bridge, executor) = ready_bridge();
        let reply = bridge.send(Action::UnloadAudio, Payload::Empty).unwrap();
        let req = executor.recv().unwrap();
        executor.send(req.reply("loadAudioResult", Payload::Ack(true)));
        let err = bridge.wait(reply, TIMEOUT).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::UnexpectedResponse { expected: "unloadAudioResult", .. }
        ));
    }

    #[test]
    fn test_error_kind_is_accepted() {
        let (mut bridge, executor) = ready_bridge();
        let reply = bridge.send(Action::GetMetadata, Payload::Empty).unwrap();
        let req = executor.recv().unwrap();
        let failure = Failure::new(FailureKind::NotLoaded, "nothing loaded");
        executor.send(req.reply(ERROR_KIND, Payload::Failed(failure)));
        assert!(matches!(
            bridge.wait(reply, TIMEOUT).unwrap(),
            Payload::Failed(f) if f.kind == FailureKind::NotLoaded
        ));
    }

    #[test]
    fn test_executor_gone() {
        let (mut bridge, executor) = ready_bridge();
        let reply = bridge.send(Action::GetMetadata, Payload::Empty).unwrap();
        drop(executor);
        assert_eq!(bridge.wait(reply, TIMEOUT).unwrap_err(), BridgeError::ExecutorGone);
        assert_eq!(bridge.pending_count(), 0);
        assert_eq!(
            bridge.send(Action::GetMetadata, Payload::Empty).unwrap_err(),
            BridgeError::ExecutorGone
        );
    }
}
