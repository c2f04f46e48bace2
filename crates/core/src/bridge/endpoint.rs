//! Bidirectional in-process channel between controller and executor.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

use super::message::Message;

/// One side of a message channel.
pub struct Endpoint {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

/// Outcome of a bounded receive.
#[derive(Debug)]
pub enum Received {
    Message(Message),
    Empty,
    Closed,
}

impl Endpoint {
    /// Create two connected endpoints.
    pub fn pair() -> (Endpoint, Endpoint) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            Endpoint { tx: a_tx, rx: a_rx },
            Endpoint { tx: b_tx, rx: b_rx },
        )
    }

    /// Send to the other side. Returns false if it hung up.
    pub fn send(&self, msg: Message) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// Block until a message arrives; `None` once the other side is gone.
    pub fn recv(&self) -> Option<Message> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Received {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Received::Message(msg),
            Err(RecvTimeoutError::Timeout) => Received::Empty,
            Err(RecvTimeoutError::Disconnected) => Received::Closed,
        }
    }

    pub fn try_recv(&self) -> Received {
        match self.rx.try_recv() {
            Ok(msg) => Received::Message(msg),
            Err(TryRecvError::Empty) => Received::Empty,
            Err(TryRecvError::Disconnected) => Received::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_cross_connected() {
        let (a, b) = Endpoint::pair();
        assert!(a.send(Message::ready()));
        assert!(matches!(b.try_recv(), Received::Message(m) if m.is_ready()));
        assert!(matches!(a.try_recv(), Received::Empty));
    }

    #[test]
    fn test_closed_after_drop() {
        let (a, b) = Endpoint::pair();
        drop(b);
        assert!(!a.send(Message::ready()));
        assert!(matches!(a.recv_timeout(Duration::from_millis(5)), Received::Closed));
        assert!(a.recv().is_none());
    }
}
