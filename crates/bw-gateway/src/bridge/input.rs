//! Client input queue
//!
//! The SSH handler runs inside russh's session loop, which also delivers
//! window adjustments. Offering input never waits: a full queue is reported
//! to the caller instead.

use tokio::sync::mpsc::{self, error::TrySendError};

use super::proxy::ClientInput;

/// The client sent more input than the pod has taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputOverflow;

/// Producer side of a bridge's input queue
#[derive(Debug, Clone)]
pub struct InputQueue {
    tx: mpsc::Sender<ClientInput>,
}

impl From<mpsc::Sender<ClientInput>> for InputQueue {
    fn from(tx: mpsc::Sender<ClientInput>) -> Self {
        Self { tx }
    }
}

impl InputQueue {
    /// Queue and receiver holding at most `depth` messages
    pub fn bounded(depth: usize) -> (Self, mpsc::Receiver<ClientInput>) {
        let (tx, rx) = mpsc::channel(depth);
        (Self { tx }, rx)
    }

    /// Queue client data. Data for a finished bridge is dropped.
    pub fn offer(&self, data: &[u8]) -> Result<(), InputOverflow> {
        match self.tx.try_send(ClientInput::Data(data.to_vec().into())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(InputOverflow),
            Err(TrySendError::Closed(_)) => {
                tracing::trace!("Dropping {} bytes for a finished bridge", data.len());
                Ok(())
            }
        }
    }

    /// Queue the client's EOF. When the queue is full, a task delivers it
    /// once the bridge has made room; no data can follow it.
    pub fn eof(&self) {
        match self.tx.try_send(ClientInput::Eof) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(eof)) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(eof).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_queue_reports_overflow() {
        let (queue, mut rx) = InputQueue::bounded(2);
        assert_eq!(queue.offer(b"a"), Ok(()));
        assert_eq!(queue.offer(b"b"), Ok(()));
        assert_eq!(queue.offer(b"c"), Err(InputOverflow));

        assert_eq!(rx.recv().await, Some(ClientInput::Data("a".into())));
        assert_eq!(queue.offer(b"c"), Ok(()));
    }

    #[tokio::test]
    async fn test_eof_waits_for_room_off_the_caller() {
        let (queue, mut rx) = InputQueue::bounded(1);
        queue.offer(b"x").unwrap();
        queue.eof();

        assert_eq!(rx.recv().await, Some(ClientInput::Data("x".into())));
        assert_eq!(rx.recv().await, Some(ClientInput::Eof));
    }

    #[tokio::test]
    async fn test_finished_bridge_drops_input() {
        let (queue, rx) = InputQueue::bounded(1);
        drop(rx);
        assert_eq!(queue.offer(b"late"), Ok(()));
        queue.eof();
    }
}
