//! Session fixtures: a registered session wired to a scripted worker, plus
//! frame helpers shared by the test modules.

use mc_chaincode::adapters::{ChannelStream, InProcessSupport, MemoryLedger};
use mc_chaincode::ports::{ChaincodeStream, Ledger};
use mc_chaincode::{Handler, SessionError, SessionHandle};
use shared_types::payloads::encode;
use shared_types::{
    ChaincodeId, ChaincodeInput, ChaincodeMessage, MessageType, Transaction, TransactionType,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Generous bound for every awaited frame; tests fail loudly instead of
/// hanging.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// A running session plus the worker side of its stream.
pub struct TestSession {
    /// Worker half of the duplex stream; tests script the chaincode here.
    pub worker: ChannelStream,
    /// Handle registered with the support plane.
    pub session: SessionHandle,
    /// The pump task; resolves when the stream terminates.
    pub pump: JoinHandle<Result<(), SessionError>>,
}

impl TestSession {
    /// Next frame the worker receives.
    pub async fn recv(&self) -> ChaincodeMessage {
        timeout(FRAME_TIMEOUT, self.worker.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("stream failed")
            .expect("stream closed")
    }

    /// Send a frame from the worker.
    pub async fn send(&self, msg: ChaincodeMessage) {
        self.worker.send(msg).await.expect("worker send failed");
    }

    /// Assert no frame arrives within `window`.
    pub async fn expect_silence(&self, window: Duration) {
        assert!(
            timeout(window, self.worker.recv()).await.is_err(),
            "unexpected frame from peer"
        );
    }
}

/// Start a session on `support`/`ledger` and complete the REGISTER
/// handshake under `name`.
pub async fn start_registered(
    support: &Arc<InProcessSupport>,
    ledger: &Arc<MemoryLedger>,
    name: &str,
) -> TestSession {
    start_registered_with(support, Arc::clone(ledger) as _, name).await
}

/// Like [`start_registered`], for tests that bring their own ledger.
pub async fn start_registered_with(
    support: &Arc<InProcessSupport>,
    ledger: Arc<dyn Ledger>,
    name: &str,
) -> TestSession {
    let (peer_side, worker) = ChannelStream::pair(64);
    let (handler, ready) = Handler::new(Arc::new(peer_side), Arc::clone(support) as _, ledger);
    let session = handler.handle();
    let pump = tokio::spawn(handler.run());

    worker
        .send(ChaincodeMessage::new(
            MessageType::Register,
            "",
            encode(&ChaincodeId::named(name)).unwrap(),
        ))
        .await
        .unwrap();

    let ts = TestSession {
        worker,
        session,
        pump,
    };
    let ack = ts.recv().await;
    assert_eq!(ack.msg_type, MessageType::Registered);
    assert!(ready.await.unwrap(), "handshake failed");
    ts
}

/// Drive the session into `ready` (no-init path) and consume the READY
/// frame on both sides.
pub async fn drive_ready(ts: &TestSession, tx_id: &str, tx: Transaction) {
    let mut rx = ts
        .session
        .init_or_ready(tx_id, None, tx, None)
        .await
        .expect("init_or_ready failed");

    let ready_frame = ts.recv().await;
    assert_eq!(ready_frame.msg_type, MessageType::Ready);

    // Entering `ready` delivers the driving frame on the rendezvous.
    let notified = timeout(FRAME_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for READY notification")
        .expect("rendezvous closed");
    assert_eq!(notified.msg_type, MessageType::Ready);
    ts.session.delete_context(tx_id);
}

/// Deploy-typed transaction descriptor.
pub fn deploy_descriptor(name: &str, tx_id: &str, key_material: &[u8]) -> Transaction {
    Transaction::new(
        tx_id,
        TransactionType::Deploy,
        &ChaincodeId {
            name: name.to_string(),
            path: format!("github.com/example/{name}"),
        },
        b"code package".to_vec(),
        key_material.to_vec(),
    )
    .unwrap()
}

/// Execute-typed transaction descriptor.
pub fn execute_descriptor(name: &str, tx_id: &str, key_material: &[u8]) -> Transaction {
    Transaction::new(
        tx_id,
        TransactionType::Execute,
        &ChaincodeId::named(name),
        Vec::new(),
        key_material.to_vec(),
    )
    .unwrap()
}

/// Query-typed transaction descriptor.
pub fn query_descriptor(name: &str, tx_id: &str, key_material: &[u8]) -> Transaction {
    Transaction::new(
        tx_id,
        TransactionType::Query,
        &ChaincodeId::named(name),
        Vec::new(),
        key_material.to_vec(),
    )
    .unwrap()
}

/// Chaincode input with string arguments.
pub fn input(function: &str, args: &[&str]) -> ChaincodeInput {
    ChaincodeInput {
        function: function.to_string(),
        args: args.iter().map(ToString::to_string).collect(),
    }
}
