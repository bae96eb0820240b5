//! State access flows: point reads, writes, query gating, paged range
//! scans, duplicate-request dropping, nested invocation and confidential
//! state.

use crate::harness::*;
use async_trait::async_trait;
use mc_chaincode::adapters::{DerivedKeyHelper, InProcessSupport, MemoryLedger};
use mc_chaincode::ports::{Ledger, RangeScanIterator, SecurityHelper, SupportPlane};
use mc_chaincode::{
    LedgerError, SessionError, SupportError, MAX_RANGE_QUERY_STATE_LIMIT,
};
use shared_types::payloads::{decode, encode};
use shared_types::{
    ChaincodeId, ChaincodeMessage, ChaincodeSpec, MessageType, PutStateInfo, RangeQueryState,
    RangeQueryStateClose, RangeQueryStateNext, RangeQueryStateResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;

const CC: &str = "token";

fn collaborators() -> (Arc<InProcessSupport>, Arc<MemoryLedger>) {
    (
        Arc::new(InProcessSupport::new()),
        Arc::new(MemoryLedger::new()),
    )
}

async fn seed_committed(ledger: &MemoryLedger, entries: &[(&str, &[u8])]) {
    for (key, value) in entries {
        ledger.set_state(CC, key, value.to_vec()).await.unwrap();
    }
    ledger.commit(CC);
}

#[tokio::test]
async fn invoke_reads_committed_and_own_writes() {
    let (support, ledger) = collaborators();
    seed_committed(&ledger, &[("a", b"100")]).await;

    let ts = start_registered(&support, &ledger, CC).await;
    drive_ready(&ts, "ready-1", execute_descriptor(CC, "ready-1", b"m")).await;

    let tx = execute_descriptor(CC, "tx2", b"m");
    let msg = ChaincodeMessage::transaction("tx2", &input("move", &["a", "b", "10"])).unwrap();
    let mut rx = ts.session.send_execute(msg, Some(tx)).await.unwrap();
    assert_eq!(ts.recv().await.msg_type, MessageType::Transaction);

    // Read the committed value.
    ts.send(ChaincodeMessage::new(
        MessageType::GetState,
        "tx2",
        b"a".to_vec(),
    ))
    .await;
    let reply = ts.recv().await;
    assert_eq!(reply.msg_type, MessageType::Response);
    assert_eq!(reply.payload, b"100");

    // Write a new value.
    ts.send(ChaincodeMessage::new(
        MessageType::PutState,
        "tx2",
        encode(&PutStateInfo {
            key: "a".to_string(),
            value: b"90".to_vec(),
        })
        .unwrap(),
    ))
    .await;
    assert_eq!(ts.recv().await.msg_type, MessageType::Response);

    // The transaction observes its own uncommitted write.
    ts.send(ChaincodeMessage::new(
        MessageType::GetState,
        "tx2",
        b"a".to_vec(),
    ))
    .await;
    assert_eq!(ts.recv().await.payload, b"90");

    ts.send(ChaincodeMessage::new(
        MessageType::Completed,
        "tx2",
        b"moved".to_vec(),
    ))
    .await;
    let terminal = timeout(FRAME_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(terminal.msg_type, MessageType::Completed);
    ts.session.delete_context("tx2");

    // Nothing was committed by the session itself.
    assert_eq!(ledger.get_state(CC, "a", true).await.unwrap(), b"100");
    assert_eq!(ledger.get_state(CC, "a", false).await.unwrap(), b"90");

    // A query against the same key keeps reading committed state.
    let q = ChaincodeMessage::query("q1", &input("balance", &["a"])).unwrap();
    let mut qrx = ts
        .session
        .send_execute(q, Some(query_descriptor(CC, "q1", b"m")))
        .await
        .unwrap();
    assert_eq!(ts.recv().await.msg_type, MessageType::Query);

    ts.send(ChaincodeMessage::new(
        MessageType::GetState,
        "q1",
        b"a".to_vec(),
    ))
    .await;
    assert_eq!(ts.recv().await.payload, b"100");

    ts.send(ChaincodeMessage::new(
        MessageType::QueryCompleted,
        "q1",
        b"100".to_vec(),
    ))
    .await;
    let terminal = timeout(FRAME_TIMEOUT, qrx.recv()).await.unwrap().unwrap();
    assert_eq!(terminal.msg_type, MessageType::QueryCompleted);
    ts.session.delete_context("q1");
}

#[tokio::test]
async fn write_in_query_context_is_refused() {
    let (support, ledger) = collaborators();
    seed_committed(&ledger, &[("a", b"100")]).await;

    let ts = start_registered(&support, &ledger, CC).await;
    drive_ready(&ts, "ready-1", execute_descriptor(CC, "ready-1", b"m")).await;

    let q = ChaincodeMessage::query("q1", &input("drain", &["a"])).unwrap();
    let mut qrx = ts
        .session
        .send_execute(q, Some(query_descriptor(CC, "q1", b"m")))
        .await
        .unwrap();
    assert_eq!(ts.recv().await.msg_type, MessageType::Query);

    // The worker misbehaves: a write inside a query.
    ts.send(ChaincodeMessage::new(
        MessageType::PutState,
        "q1",
        encode(&PutStateInfo {
            key: "a".to_string(),
            value: b"0".to_vec(),
        })
        .unwrap(),
    ))
    .await;

    let refusal = ts.recv().await;
    assert_eq!(refusal.msg_type, MessageType::Error);
    assert_eq!(
        refusal.payload_text(),
        "cannot handle PUT_STATE in query context"
    );

    // The misuse terminates the session; the waiter still gets a terminal.
    assert!(matches!(
        ts.pump.await.unwrap(),
        Err(SessionError::QueryContextViolation { .. })
    ));
    let terminal = timeout(FRAME_TIMEOUT, qrx.recv()).await.unwrap().unwrap();
    assert_eq!(terminal.msg_type, MessageType::Error);

    // No ledger call was made.
    assert_eq!(ledger.get_state(CC, "a", true).await.unwrap(), b"100");
    assert_eq!(ledger.get_state(CC, "a", false).await.unwrap(), b"100");
}

#[tokio::test]
async fn range_scan_pages_through_250_entries() {
    let (support, ledger) = collaborators();
    for i in 0..250 {
        ledger
            .set_state(CC, &format!("k{i:03}"), format!("v{i}").into_bytes())
            .await
            .unwrap();
    }
    ledger.commit(CC);

    let ts = start_registered(&support, &ledger, CC).await;
    drive_ready(&ts, "ready-1", execute_descriptor(CC, "ready-1", b"m")).await;

    let q = ChaincodeMessage::query("q1", &input("scan", &[])).unwrap();
    let mut qrx = ts
        .session
        .send_execute(q, Some(query_descriptor(CC, "q1", b"m")))
        .await
        .unwrap();
    assert_eq!(ts.recv().await.msg_type, MessageType::Query);

    // Open: first full page.
    ts.send(ChaincodeMessage::new(
        MessageType::RangeQueryState,
        "q1",
        encode(&RangeQueryState {
            start_key: String::new(),
            end_key: String::new(),
        })
        .unwrap(),
    ))
    .await;
    let reply = ts.recv().await;
    assert_eq!(reply.msg_type, MessageType::Response);
    let page: RangeQueryStateResponse = decode(&reply.payload).unwrap();
    assert_eq!(page.keys_and_values.len(), MAX_RANGE_QUERY_STATE_LIMIT);
    assert!(page.has_more);
    assert!(!page.id.is_empty());
    assert_eq!(page.keys_and_values[0].key, "k000");
    let iter_id = page.id.clone();

    // Second full page.
    ts.send(ChaincodeMessage::new(
        MessageType::RangeQueryStateNext,
        "q1",
        encode(&RangeQueryStateNext {
            id: iter_id.clone(),
        })
        .unwrap(),
    ))
    .await;
    let page: RangeQueryStateResponse = decode(&ts.recv().await.payload).unwrap();
    assert_eq!(page.keys_and_values.len(), MAX_RANGE_QUERY_STATE_LIMIT);
    assert!(page.has_more);
    assert_eq!(page.keys_and_values[0].key, "k100");

    // Final partial page closes and drops the cursor.
    ts.send(ChaincodeMessage::new(
        MessageType::RangeQueryStateNext,
        "q1",
        encode(&RangeQueryStateNext {
            id: iter_id.clone(),
        })
        .unwrap(),
    ))
    .await;
    let page: RangeQueryStateResponse = decode(&ts.recv().await.payload).unwrap();
    assert_eq!(page.keys_and_values.len(), 50);
    assert!(!page.has_more);
    assert_eq!(page.keys_and_values[0].key, "k200");
    assert_eq!(page.keys_and_values[49].key, "k249");

    // The id is gone from the registry.
    ts.send(ChaincodeMessage::new(
        MessageType::RangeQueryStateNext,
        "q1",
        encode(&RangeQueryStateNext { id: iter_id }).unwrap(),
    ))
    .await;
    let reply = ts.recv().await;
    assert_eq!(reply.msg_type, MessageType::Error);
    assert_eq!(reply.payload_text(), "range scan iterator not found");

    ts.send(ChaincodeMessage::new(
        MessageType::QueryCompleted,
        "q1",
        Vec::new(),
    ))
    .await;
    let terminal = timeout(FRAME_TIMEOUT, qrx.recv()).await.unwrap().unwrap();
    assert_eq!(terminal.msg_type, MessageType::QueryCompleted);
    ts.session.delete_context("q1");
}

#[tokio::test]
async fn closing_unknown_iterator_is_a_noop_response() {
    let (support, ledger) = collaborators();
    let ts = start_registered(&support, &ledger, CC).await;
    drive_ready(&ts, "ready-1", execute_descriptor(CC, "ready-1", b"m")).await;

    let q = ChaincodeMessage::query("q1", &input("scan", &[])).unwrap();
    let _qrx = ts
        .session
        .send_execute(q, Some(query_descriptor(CC, "q1", b"m")))
        .await
        .unwrap();
    assert_eq!(ts.recv().await.msg_type, MessageType::Query);

    ts.send(ChaincodeMessage::new(
        MessageType::RangeQueryStateClose,
        "q1",
        encode(&RangeQueryStateClose {
            id: "never-opened".to_string(),
        })
        .unwrap(),
    ))
    .await;

    let reply = ts.recv().await;
    assert_eq!(reply.msg_type, MessageType::Response);
    let body: RangeQueryStateResponse = decode(&reply.payload).unwrap();
    assert!(body.keys_and_values.is_empty());
    assert!(!body.has_more);
    assert_eq!(body.id, "never-opened");
}

// =============================================================================
// DUPLICATE REQUEST DROPPING
// =============================================================================

/// Ledger whose point reads park on a semaphore, so a second request can
/// arrive while the first is still in flight.
struct GatedLedger {
    inner: MemoryLedger,
    gate: Semaphore,
}

#[async_trait]
impl Ledger for GatedLedger {
    async fn get_state(
        &self,
        chaincode: &str,
        key: &str,
        committed: bool,
    ) -> Result<Vec<u8>, LedgerError> {
        self.gate.acquire().await.expect("gate closed").forget();
        self.inner.get_state(chaincode, key, committed).await
    }

    async fn set_state(
        &self,
        chaincode: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), LedgerError> {
        self.inner.set_state(chaincode, key, value).await
    }

    async fn delete_state(&self, chaincode: &str, key: &str) -> Result<(), LedgerError> {
        self.inner.delete_state(chaincode, key).await
    }

    async fn range_scan(
        &self,
        chaincode: &str,
        start_key: &str,
        end_key: &str,
        committed: bool,
    ) -> Result<Box<dyn RangeScanIterator>, LedgerError> {
        self.inner
            .range_scan(chaincode, start_key, end_key, committed)
            .await
    }
}

#[tokio::test]
async fn concurrent_duplicate_state_request_is_dropped() {
    let support = Arc::new(InProcessSupport::new());
    let gated = Arc::new(GatedLedger {
        inner: MemoryLedger::new(),
        gate: Semaphore::new(0),
    });
    gated.inner.set_state(CC, "a", b"100".to_vec()).await.unwrap();
    gated.inner.commit(CC);

    let ts = start_registered_with(&support, Arc::clone(&gated) as _, CC).await;
    drive_ready(&ts, "ready-1", execute_descriptor(CC, "ready-1", b"m")).await;

    let q = ChaincodeMessage::query("q1", &input("read", &["a"])).unwrap();
    let _qrx = ts
        .session
        .send_execute(q, Some(query_descriptor(CC, "q1", b"m")))
        .await
        .unwrap();
    assert_eq!(ts.recv().await.msg_type, MessageType::Query);

    // Two concurrent reads on the same transaction id.
    let get = ChaincodeMessage::new(MessageType::GetState, "q1", b"a".to_vec());
    ts.send(get.clone()).await;
    ts.send(get).await;

    // Let both actions race for the in-flight slot, then open the gate.
    tokio::time::sleep(Duration::from_millis(100)).await;
    gated.gate.add_permits(1);

    let reply = ts.recv().await;
    assert_eq!(reply.msg_type, MessageType::Response);
    assert_eq!(reply.payload, b"100");

    // Exactly one reply: the duplicate was dropped, not queued.
    ts.expect_silence(Duration::from_millis(200)).await;
}

// =============================================================================
// NESTED INVOCATION
// =============================================================================

#[tokio::test]
async fn nested_invoke_routes_through_the_target_session() {
    let (support, ledger) = collaborators();
    let caller = start_registered(&support, &ledger, "cc-a").await;
    let callee = start_registered(&support, &ledger, "cc-b").await;
    drive_ready(&caller, "ra", execute_descriptor("cc-a", "ra", b"m")).await;
    drive_ready(&callee, "rb", execute_descriptor("cc-b", "rb", b"m")).await;

    let tx = execute_descriptor("cc-a", "tx-a", b"m");
    let msg = ChaincodeMessage::transaction("tx-a", &input("outer", &[])).unwrap();
    let mut rx = caller.session.send_execute(msg, Some(tx)).await.unwrap();
    assert_eq!(caller.recv().await.msg_type, MessageType::Transaction);

    // Worker A asks the peer to invoke cc-b.
    caller
        .send(ChaincodeMessage::new(
            MessageType::InvokeChaincode,
            "tx-a",
            encode(&ChaincodeSpec {
                chaincode_id: ChaincodeId::named("cc-b"),
                input: input("inner", &["x"]),
            })
            .unwrap(),
        ))
        .await;

    // The nested call reaches worker B on its own stream, carrying the
    // caller's transaction id.
    let nested = callee.recv().await;
    assert_eq!(nested.msg_type, MessageType::Transaction);
    assert_eq!(nested.tx_id, "tx-a");

    callee
        .send(ChaincodeMessage::new(
            MessageType::Completed,
            "tx-a",
            b"inner result".to_vec(),
        ))
        .await;

    // Worker A receives the nested result as a RESPONSE.
    let reply = caller.recv().await;
    assert_eq!(reply.msg_type, MessageType::Response);
    assert_eq!(reply.payload, b"inner result");

    caller
        .send(ChaincodeMessage::new(
            MessageType::Completed,
            "tx-a",
            b"outer result".to_vec(),
        ))
        .await;
    let terminal = timeout(FRAME_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(terminal.payload, b"outer result");
    caller.session.delete_context("tx-a");
}

#[tokio::test]
async fn nested_execute_times_out_when_the_target_stalls() {
    let (support, ledger) = collaborators();
    let ts = start_registered(&support, &ledger, CC).await;
    drive_ready(&ts, "ready-1", execute_descriptor(CC, "ready-1", b"m")).await;

    let msg = ChaincodeMessage::transaction("nested-1", &input("slow", &[])).unwrap();
    let result = support
        .execute(CC, msg, Duration::from_millis(50))
        .await;

    assert!(matches!(result, Err(SupportError::ExecuteTimeout(_))));
    // The frame did reach the stalled worker.
    assert_eq!(ts.recv().await.msg_type, MessageType::Transaction);
}

// =============================================================================
// CONFIDENTIAL STATE
// =============================================================================

#[tokio::test]
async fn confidential_state_is_sealed_on_the_ledger() {
    let helper = Arc::new(DerivedKeyHelper::new());
    let support = Arc::new(InProcessSupport::with_security(helper.clone()));
    let ledger = Arc::new(MemoryLedger::new());

    let ts = start_registered(&support, &ledger, CC).await;

    // Deploy with key material; the worker writes during init.
    let deploy = deploy_descriptor(CC, "tx1", b"deploy km");
    let mut rx = ts
        .session
        .init_or_ready("tx1", Some(input("init", &["a", "100"])), deploy.clone(), None)
        .await
        .unwrap();
    assert_eq!(ts.recv().await.msg_type, MessageType::Init);

    ts.send(ChaincodeMessage::new(
        MessageType::PutState,
        "tx1",
        encode(&PutStateInfo {
            key: "a".to_string(),
            value: b"100".to_vec(),
        })
        .unwrap(),
    ))
    .await;
    assert_eq!(ts.recv().await.msg_type, MessageType::Response);

    ts.send(ChaincodeMessage::new(MessageType::Completed, "tx1", Vec::new()))
        .await;
    assert_eq!(
        timeout(FRAME_TIMEOUT, rx.recv()).await.unwrap().unwrap().msg_type,
        MessageType::Completed
    );
    ts.session.delete_context("tx1");
    ledger.commit(CC);

    // The ledger holds ciphertext, not the plaintext balance.
    let raw = ledger.get_state(CC, "a", true).await.unwrap();
    assert_ne!(raw, b"100");
    assert!(raw.len() > b"100".len());

    // A later invoke reads the plaintext back through the mediator.
    let tx = execute_descriptor(CC, "tx2", b"invoke km");
    let msg = ChaincodeMessage::transaction("tx2", &input("read", &["a"])).unwrap();
    let mut rx = ts.session.send_execute(msg, Some(tx)).await.unwrap();
    assert_eq!(ts.recv().await.msg_type, MessageType::Transaction);

    ts.send(ChaincodeMessage::new(
        MessageType::GetState,
        "tx2",
        b"a".to_vec(),
    ))
    .await;
    let reply = ts.recv().await;
    assert_eq!(reply.msg_type, MessageType::Response);
    assert_eq!(reply.payload, b"100");

    ts.send(ChaincodeMessage::new(MessageType::Completed, "tx2", Vec::new()))
        .await;
    timeout(FRAME_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    ts.session.delete_context("tx2");
}

#[tokio::test]
async fn query_results_are_sealed_for_the_caller() {
    let helper = Arc::new(DerivedKeyHelper::new());
    let support = Arc::new(InProcessSupport::with_security(helper.clone()));
    let ledger = Arc::new(MemoryLedger::new());

    let ts = start_registered(&support, &ledger, CC).await;
    let deploy = deploy_descriptor(CC, "tx1", b"deploy km");
    drive_ready(&ts, "tx1", deploy.clone()).await;

    let q = ChaincodeMessage::query("q1", &input("balance", &["a"])).unwrap();
    let mut qrx = ts
        .session
        .send_execute(q, Some(query_descriptor(CC, "q1", b"query km")))
        .await
        .unwrap();
    assert_eq!(ts.recv().await.msg_type, MessageType::Query);

    ts.send(ChaincodeMessage::new(
        MessageType::QueryCompleted,
        "q1",
        b"result".to_vec(),
    ))
    .await;

    let terminal = timeout(FRAME_TIMEOUT, qrx.recv()).await.unwrap().unwrap();
    assert_eq!(terminal.msg_type, MessageType::QueryCompleted);
    assert_ne!(terminal.payload, b"result");

    // The caller opens the result with the deploy-anchored encryptor.
    let enc = helper.state_encryptor(&deploy, &deploy).unwrap();
    assert_eq!(enc.decrypt(&terminal.payload).unwrap(), b"result");
}
