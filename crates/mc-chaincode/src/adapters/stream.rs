//! Channel-backed chaincode stream: a pair of cross-wired tokio channels.
//! One half lives on the peer, the other plays the worker. Dropping either
//! half surfaces as EOF on the opposite side.

use crate::errors::StreamError;
use crate::ports::ChaincodeStream;
use async_trait::async_trait;
use shared_types::ChaincodeMessage;
use tokio::sync::{mpsc, Mutex};

/// One half of a duplex frame channel.
pub struct ChannelStream {
    tx: mpsc::Sender<ChaincodeMessage>,
    rx: Mutex<mpsc::Receiver<ChaincodeMessage>>,
}

impl ChannelStream {
    /// Build a connected pair. The first half is the peer side, the second
    /// the worker side; they are symmetric.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (
            Self {
                tx: a_tx,
                rx: Mutex::new(b_rx),
            },
            Self {
                tx: b_tx,
                rx: Mutex::new(a_rx),
            },
        )
    }
}

#[async_trait]
impl ChaincodeStream for ChannelStream {
    async fn send(&self, msg: ChaincodeMessage) -> Result<(), StreamError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| StreamError::Transport("remote half dropped".to_string()))
    }

    async fn recv(&self) -> Result<Option<ChaincodeMessage>, StreamError> {
        Ok(self.rx.lock().await.recv().await)
    }
}
