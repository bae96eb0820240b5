//! # Background Actions
//!
//! Ledger reads, writes and nested executions run here, on tasks spawned by
//! the session's FSM callbacks. Every action claims the per-transaction
//! in-flight slot first (duplicates are dropped silently), performs its I/O,
//! then releases the slot and publishes exactly one reply: reads answer on
//! the serialized sender, writes reconverge through the `next_state` drive
//! channel so the busy state unwinds before the worker sees the reply.

use crate::errors::SessionError;
use crate::ports::RangeScanIterator;
use crate::session::{short_id, SessionCore, EXECUTE_TIMEOUT};
use shared_types::payloads::{decode, encode};
use shared_types::{
    ChaincodeMessage, ChaincodeSpec, PutStateInfo, RangeQueryKeyValue, RangeQueryState,
    RangeQueryStateClose, RangeQueryStateNext, RangeQueryStateResponse, Transaction,
    TransactionType,
};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Maximum key/value pairs per range scan frame. Scans with more pairs set
/// `has_more` and continue via RANGE_QUERY_STATE_NEXT.
pub const MAX_RANGE_QUERY_STATE_LIMIT: usize = 100;

/// Collapse an action result into the frame the worker receives.
fn reply_frame(tx_id: &str, result: Result<Vec<u8>, SessionError>) -> ChaincodeMessage {
    match result {
        Ok(payload) => ChaincodeMessage::response(tx_id, payload),
        Err(e) => {
            error!(tx = short_id(tx_id), error = %e, "action failed, sending ERROR");
            ChaincodeMessage::error(tx_id, e.to_string())
        }
    }
}

/// Send a read reply on the serialized sender. Failures here mean the stream
/// is going down; the pump will notice on its own.
async fn send_reply(core: &SessionCore, reply: ChaincodeMessage) {
    if let Err(e) = core.serial_send(reply).await {
        debug!(error = %e, "failed to send action reply");
    }
}

// =============================================================================
// POINT READS
// =============================================================================

/// GET_STATE: fetch one key from the ledger, decrypt, reply RESPONSE.
pub(crate) async fn handle_get_state(core: Arc<SessionCore>, msg: ChaincodeMessage) {
    if !core.registry.claim_in_flight(&msg.tx_id) {
        debug!(
            tx = short_id(&msg.tx_id),
            "another state request pending, dropping GET_STATE"
        );
        return;
    }
    let reply = reply_frame(&msg.tx_id, get_state(&core, &msg).await);
    core.registry.release_in_flight(&msg.tx_id);
    send_reply(&core, reply).await;
}

async fn get_state(core: &SessionCore, msg: &ChaincodeMessage) -> Result<Vec<u8>, SessionError> {
    let key = String::from_utf8_lossy(&msg.payload).into_owned();
    let chaincode = core.chaincode_name()?;

    // Queries read committed state; transactions read their own writes.
    let committed = !core.registry.is_transaction(&msg.tx_id);
    let value = core.ledger.get_state(&chaincode, &key, committed).await?;
    let value = core.decrypt(&msg.tx_id, value)?;
    debug!(tx = short_id(&msg.tx_id), key = %key, "got state");
    Ok(value)
}

// =============================================================================
// RANGE SCANS
// =============================================================================

/// Pull up to one page off the cursor, decrypting each value. The trailing
/// `next()` after the final pair is what `has_more` reports, so a NEXT
/// request resumes exactly where this page stopped.
fn drain_page(
    core: &SessionCore,
    tx_id: &str,
    iter: &mut dyn RangeScanIterator,
    mut has_more: bool,
) -> Result<(Vec<RangeQueryKeyValue>, bool), SessionError> {
    let mut pairs = Vec::new();
    while has_more && pairs.len() < MAX_RANGE_QUERY_STATE_LIMIT {
        let (key, value) = iter.key_value();
        let value = core.decrypt(tx_id, value)?;
        pairs.push(RangeQueryKeyValue { key, value });
        has_more = iter.next();
    }
    Ok((pairs, has_more))
}

/// Park the cursor for a later NEXT, or close it when the scan is done.
/// Returns the RESPONSE frame or an ERROR when the context disappeared.
fn finish_page(
    core: &SessionCore,
    tx_id: &str,
    iter_id: &str,
    mut iter: Box<dyn RangeScanIterator>,
    pairs: Vec<RangeQueryKeyValue>,
    has_more: bool,
) -> ChaincodeMessage {
    let response = RangeQueryStateResponse {
        keys_and_values: pairs,
        has_more,
        id: iter_id.to_string(),
    };
    let payload = match encode(&response) {
        Ok(payload) => payload,
        Err(e) => {
            iter.close();
            return reply_frame(tx_id, Err(e.into()));
        }
    };

    if has_more {
        if let Err(mut orphan) = core.registry.store_iterator(tx_id, iter_id, iter) {
            orphan.close();
            return reply_frame(tx_id, Err(SessionError::MissingContext(tx_id.to_string())));
        }
    } else {
        iter.close();
    }
    ChaincodeMessage::response(tx_id, payload)
}

/// RANGE_QUERY_STATE: open a cursor, reply with the first page.
pub(crate) async fn handle_range_query(core: Arc<SessionCore>, msg: ChaincodeMessage) {
    if !core.registry.claim_in_flight(&msg.tx_id) {
        debug!(
            tx = short_id(&msg.tx_id),
            "another state request pending, dropping RANGE_QUERY_STATE"
        );
        return;
    }
    let reply = range_query_open(&core, &msg).await;
    core.registry.release_in_flight(&msg.tx_id);
    send_reply(&core, reply).await;
}

async fn range_query_open(core: &SessionCore, msg: &ChaincodeMessage) -> ChaincodeMessage {
    let request: RangeQueryState = match decode(&msg.payload) {
        Ok(request) => request,
        Err(e) => return reply_frame(&msg.tx_id, Err(e.into())),
    };
    let chaincode = match core.chaincode_name() {
        Ok(chaincode) => chaincode,
        Err(e) => return reply_frame(&msg.tx_id, Err(e)),
    };

    let committed = !core.registry.is_transaction(&msg.tx_id);
    let mut iter = match core
        .ledger
        .range_scan(&chaincode, &request.start_key, &request.end_key, committed)
        .await
    {
        Ok(iter) => iter,
        Err(e) => return reply_frame(&msg.tx_id, Err(e.into())),
    };

    let iter_id = Uuid::new_v4().to_string();
    let positioned = iter.next();
    match drain_page(core, &msg.tx_id, iter.as_mut(), positioned) {
        Ok((pairs, has_more)) => {
            debug!(
                tx = short_id(&msg.tx_id),
                iter = %iter_id,
                pairs = pairs.len(),
                has_more,
                "range scan opened"
            );
            finish_page(core, &msg.tx_id, &iter_id, iter, pairs, has_more)
        }
        Err(e) => {
            iter.close();
            reply_frame(&msg.tx_id, Err(e))
        }
    }
}

/// RANGE_QUERY_STATE_NEXT: continue a parked cursor.
pub(crate) async fn handle_range_query_next(core: Arc<SessionCore>, msg: ChaincodeMessage) {
    if !core.registry.claim_in_flight(&msg.tx_id) {
        debug!(
            tx = short_id(&msg.tx_id),
            "another state request pending, dropping RANGE_QUERY_STATE_NEXT"
        );
        return;
    }
    let reply = range_query_next(&core, &msg);
    core.registry.release_in_flight(&msg.tx_id);
    send_reply(&core, reply).await;
}

fn range_query_next(core: &SessionCore, msg: &ChaincodeMessage) -> ChaincodeMessage {
    let request: RangeQueryStateNext = match decode(&msg.payload) {
        Ok(request) => request,
        Err(e) => return reply_frame(&msg.tx_id, Err(e.into())),
    };

    let Some(mut iter) = core.registry.take_iterator(&msg.tx_id, &request.id) else {
        return ChaincodeMessage::error(&msg.tx_id, "range scan iterator not found");
    };

    // The cursor was parked positioned on an unread pair.
    match drain_page(core, &msg.tx_id, iter.as_mut(), true) {
        Ok((pairs, has_more)) => {
            debug!(
                tx = short_id(&msg.tx_id),
                iter = %request.id,
                pairs = pairs.len(),
                has_more,
                "range scan continued"
            );
            finish_page(core, &msg.tx_id, &request.id, iter, pairs, has_more)
        }
        Err(e) => {
            iter.close();
            reply_frame(&msg.tx_id, Err(e))
        }
    }
}

/// RANGE_QUERY_STATE_CLOSE: release a cursor. Unknown ids are a no-op that
/// still answers RESPONSE.
pub(crate) async fn handle_range_query_close(core: Arc<SessionCore>, msg: ChaincodeMessage) {
    if !core.registry.claim_in_flight(&msg.tx_id) {
        debug!(
            tx = short_id(&msg.tx_id),
            "another state request pending, dropping RANGE_QUERY_STATE_CLOSE"
        );
        return;
    }
    let reply = range_query_close(&core, &msg);
    core.registry.release_in_flight(&msg.tx_id);
    send_reply(&core, reply).await;
}

fn range_query_close(core: &SessionCore, msg: &ChaincodeMessage) -> ChaincodeMessage {
    let request: RangeQueryStateClose = match decode(&msg.payload) {
        Ok(request) => request,
        Err(e) => return reply_frame(&msg.tx_id, Err(e.into())),
    };

    if let Some(mut iter) = core.registry.take_iterator(&msg.tx_id, &request.id) {
        iter.close();
        debug!(tx = short_id(&msg.tx_id), iter = %request.id, "range scan closed");
    }

    let response = RangeQueryStateResponse {
        keys_and_values: Vec::new(),
        has_more: false,
        id: request.id,
    };
    match encode(&response) {
        Ok(payload) => ChaincodeMessage::response(&msg.tx_id, payload),
        Err(e) => reply_frame(&msg.tx_id, Err(e.into())),
    }
}

// =============================================================================
// WRITES AND NESTED INVOCATION (busy states)
// =============================================================================

/// Entry action of `busyinit` / `busyxact`: the arbiter that refuses
/// write-class requests in query context, then performs the write or nested
/// invocation. The reply always re-enters the state machine so the busy
/// state unwinds to its parent before the worker sees it.
pub(crate) async fn enter_busy(core: Arc<SessionCore>, msg: ChaincodeMessage) {
    // The worker's claim that this id is a transaction is not trusted; only
    // the peer's own table admits writes.
    if !core.registry.is_transaction(&msg.tx_id) {
        let text = format!("cannot handle {} in query context", msg.msg_type);
        debug!(tx = short_id(&msg.tx_id), "{text}");
        core.trigger_next_state(ChaincodeMessage::error(&msg.tx_id, text), true)
            .await;
        return;
    }

    if !core.registry.claim_in_flight(&msg.tx_id) {
        debug!(
            tx = short_id(&msg.tx_id),
            "another request pending, dropping {}", msg.msg_type
        );
        return;
    }

    let result = perform_busy_work(&core, &msg).await;
    core.registry.release_in_flight(&msg.tx_id);

    let reply = reply_frame(&msg.tx_id, result);
    debug!(
        tx = short_id(&msg.tx_id),
        msg_type = %reply.msg_type,
        "busy action complete, driving state"
    );
    core.trigger_next_state(reply, true).await;
}

async fn perform_busy_work(
    core: &SessionCore,
    msg: &ChaincodeMessage,
) -> Result<Vec<u8>, SessionError> {
    let chaincode = core.chaincode_name()?;

    match msg.msg_type {
        shared_types::MessageType::PutState => {
            let info: PutStateInfo = decode(&msg.payload)?;
            let sealed = core.encrypt(&msg.tx_id, info.value)?;
            core.ledger.set_state(&chaincode, &info.key, sealed).await?;
            Ok(Vec::new())
        }
        shared_types::MessageType::DelState => {
            let key = String::from_utf8_lossy(&msg.payload).into_owned();
            core.ledger.delete_state(&chaincode, &key).await?;
            Ok(Vec::new())
        }
        shared_types::MessageType::InvokeChaincode => {
            invoke_chaincode(core, msg, TransactionType::Execute).await
        }
        other => Err(SessionError::Inadmissible {
            state: core.state(),
            msg_type: other,
            payload_len: msg.payload.len(),
        }),
    }
}

/// Launch the target chaincode (idempotent) and execute the nested call
/// through the support plane. The call routes to the target's own session;
/// this session's stream stays untouched.
async fn invoke_chaincode(
    core: &SessionCore,
    msg: &ChaincodeMessage,
    tx_type: TransactionType,
) -> Result<Vec<u8>, SessionError> {
    let spec: ChaincodeSpec = decode(&msg.payload)?;
    let target = spec.chaincode_id.name.clone();

    // The nested transaction carries the caller's transaction id.
    let tx = Transaction::for_invocation(&spec, &msg.tx_id, tx_type)?;
    let input = core.support.launch(&tx).await?;

    let nested = match tx_type {
        TransactionType::Query => ChaincodeMessage::query(&tx.tx_id, &input)?,
        _ => ChaincodeMessage::transaction(&tx.tx_id, &input)?,
    };

    debug!(
        tx = short_id(&msg.tx_id),
        target = %target,
        "dispatching nested {}", nested.msg_type
    );
    let response = core.support.execute(&target, nested, EXECUTE_TIMEOUT).await?;
    Ok(response.payload)
}

/// INVOKE_QUERY: nested query of another chaincode. Out-of-band: replies on
/// the serialized sender and never drives the state machine.
pub(crate) async fn handle_query_chaincode(core: Arc<SessionCore>, msg: ChaincodeMessage) {
    if !core.registry.claim_in_flight(&msg.tx_id) {
        debug!(
            tx = short_id(&msg.tx_id),
            "another request pending, dropping INVOKE_QUERY"
        );
        return;
    }
    let result = invoke_chaincode(&core, &msg, TransactionType::Query).await;
    core.registry.release_in_flight(&msg.tx_id);
    send_reply(&core, reply_frame(&msg.tx_id, result)).await;
}
