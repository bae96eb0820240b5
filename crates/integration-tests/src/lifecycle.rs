//! Lifecycle flows: handshake, deploy and ready paths, duplicate
//! registration, stream loss and init failure.

use crate::harness::*;
use mc_chaincode::adapters::{ChannelStream, InProcessSupport, MemoryLedger};
use mc_chaincode::ports::ChaincodeStream;
use mc_chaincode::{Handler, SessionError, StreamError, SupportError};
use shared_types::payloads::{decode, encode};
use shared_types::{ChaincodeId, ChaincodeInput, ChaincodeMessage, MessageType};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn collaborators() -> (Arc<InProcessSupport>, Arc<MemoryLedger>) {
    (
        Arc::new(InProcessSupport::new()),
        Arc::new(MemoryLedger::new()),
    )
}

#[tokio::test]
async fn deploy_path_drives_init_and_completes() {
    let (support, ledger) = collaborators();
    let ts = start_registered(&support, &ledger, "token").await;

    let deploy = deploy_descriptor("token", "tx1", b"material");
    let mut rx = ts
        .session
        .init_or_ready("tx1", Some(input("init", &["a", "100"])), deploy, None)
        .await
        .unwrap();

    // The INIT frame reaches the worker once the transition completed.
    let init = ts.recv().await;
    assert_eq!(init.msg_type, MessageType::Init);
    assert_eq!(init.tx_id, "tx1");
    let init_input: ChaincodeInput = decode(&init.payload).unwrap();
    assert_eq!(init_input.function, "init");
    assert_eq!(init_input.args, vec!["a", "100"]);

    assert!(!ts.session.is_running(), "init state is not running");

    ts.send(ChaincodeMessage::new(
        MessageType::Completed,
        "tx1",
        b"init ok".to_vec(),
    ))
    .await;

    let terminal = timeout(FRAME_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(terminal.msg_type, MessageType::Completed);
    assert_eq!(terminal.payload, b"init ok");

    assert!(ts.session.is_running());
    ts.session.delete_context("tx1");
}

#[tokio::test]
async fn ready_path_skips_initialization() {
    let (support, ledger) = collaborators();
    let ts = start_registered(&support, &ledger, "token").await;

    drive_ready(&ts, "ready-1", execute_descriptor("token", "ready-1", b"m")).await;
    assert!(ts.session.is_running());
}

#[tokio::test]
async fn second_register_for_same_name_fails_handshake() {
    let (support, ledger) = collaborators();
    let first = start_registered(&support, &ledger, "token").await;

    // Second worker claims the same chaincode name.
    let (peer_side, worker2) = ChannelStream::pair(8);
    let (handler2, ready2) = Handler::new(
        Arc::new(peer_side),
        Arc::clone(&support) as _,
        Arc::clone(&ledger) as _,
    );
    let pump2 = tokio::spawn(handler2.run());

    worker2
        .send(ChaincodeMessage::new(
            MessageType::Register,
            "",
            encode(&ChaincodeId::named("token")).unwrap(),
        ))
        .await
        .unwrap();

    assert!(!ready2.await.unwrap(), "duplicate handshake must fail");
    assert!(matches!(
        pump2.await.unwrap(),
        Err(SessionError::Support(SupportError::DuplicateHandler(_)))
    ));

    // The original session is untouched and still serviceable.
    assert!(support.handler("token").is_some());
    drive_ready(&first, "ready-1", execute_descriptor("token", "ready-1", b"m")).await;
}

#[tokio::test]
async fn stream_eof_releases_outstanding_waiters() {
    let (support, ledger) = collaborators();
    let ts = start_registered(&support, &ledger, "token").await;
    drive_ready(&ts, "ready-1", execute_descriptor("token", "ready-1", b"m")).await;

    let tx = execute_descriptor("token", "tx2", b"m");
    let msg = ChaincodeMessage::transaction("tx2", &input("move", &["a", "b"])).unwrap();
    let mut rx = ts.session.send_execute(msg, Some(tx)).await.unwrap();

    let forwarded = ts.recv().await;
    assert_eq!(forwarded.msg_type, MessageType::Transaction);

    // Worker dies mid-transaction.
    let TestSession {
        worker,
        session,
        pump,
    } = ts;
    drop(worker);

    assert!(matches!(
        pump.await.unwrap(),
        Err(SessionError::Stream(StreamError::Closed))
    ));

    // The waiter observes a terminal frame instead of hanging.
    let terminal = timeout(FRAME_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(terminal.msg_type, MessageType::Error);
    assert_eq!(terminal.payload_text(), "chaincode stream terminated");

    assert!(support.handler("token").is_none());
    drop(session);
}

#[tokio::test]
async fn worker_error_during_init_ends_session() {
    let (support, ledger) = collaborators();
    let ts = start_registered(&support, &ledger, "token").await;

    let deploy = deploy_descriptor("token", "tx1", b"material");
    let mut rx = ts
        .session
        .init_or_ready("tx1", Some(input("init", &[])), deploy, None)
        .await
        .unwrap();

    let init = ts.recv().await;
    assert_eq!(init.msg_type, MessageType::Init);

    ts.send(ChaincodeMessage::error("tx1", "init blew up")).await;

    let terminal = timeout(FRAME_TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(terminal.msg_type, MessageType::Error);

    assert!(matches!(
        ts.pump.await.unwrap(),
        Err(SessionError::SessionEnded)
    ));
    assert!(support.handler("token").is_none());
}

#[tokio::test]
async fn frames_before_register_terminate_the_stream() {
    let (support, ledger) = collaborators();
    let (peer_side, worker) = ChannelStream::pair(8);
    let (handler, _ready) = Handler::new(
        Arc::new(peer_side),
        Arc::clone(&support) as _,
        Arc::clone(&ledger) as _,
    );
    let pump = tokio::spawn(handler.run());

    worker
        .send(ChaincodeMessage::new(
            MessageType::GetState,
            "tx1",
            b"a".to_vec(),
        ))
        .await
        .unwrap();

    assert!(matches!(
        pump.await.unwrap(),
        Err(SessionError::Inadmissible { .. })
    ));

    // No reply was produced for the premature frame.
    assert!(timeout(Duration::from_millis(100), worker.recv())
        .await
        .map(|r| matches!(r, Ok(None)))
        .unwrap_or(true));
}
