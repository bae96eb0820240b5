//! # Chaincode Session
//!
//! One session owns one duplex stream to one running chaincode worker and
//! mediates every interaction between that worker and the peer's ledger.
//!
//! The stream pump is the single reader and the sole driver of the state
//! machine. Callbacks that need I/O spawn background tasks (see `actions`)
//! which reconverge either through the serialized sender or through the
//! `next_state` drive channel, so a transition is always complete before its
//! effect can observe the next one.

use crate::actions;
use crate::context::ContextRegistry;
use crate::errors::{SessionError, StreamError};
use crate::fsm::{Advance, Fsm, SessionState};
use crate::ports::{ChaincodeStream, Ledger, SupportPlane};
use parking_lot::Mutex;
use shared_types::payloads::encode;
use shared_types::{ChaincodeId, ChaincodeInput, ChaincodeMessage, MessageType, Transaction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

/// Timeout applied to nested chaincode executions.
pub const EXECUTE_TIMEOUT: Duration = Duration::from_secs(30);

/// First eight characters of a transaction id, for log lines.
pub(crate) fn short_id(tx_id: &str) -> &str {
    tx_id.get(..8).unwrap_or(tx_id)
}

/// A state-driving event posted by a background task: the frame re-enters
/// the state machine and, when `send_to_worker` is set, is forwarded to the
/// worker after the transition completes.
pub(crate) struct NextStateInfo {
    pub msg: ChaincodeMessage,
    pub send_to_worker: bool,
}

// =============================================================================
// SHARED CORE
// =============================================================================

/// State shared between the pump task and background actions.
pub(crate) struct SessionCore {
    pub stream: Arc<dyn ChaincodeStream>,
    pub support: Arc<dyn SupportPlane>,
    pub ledger: Arc<dyn Ledger>,
    pub registry: ContextRegistry,

    fsm: Mutex<Fsm>,
    chaincode_id: Mutex<Option<ChaincodeId>>,
    deploy_sec_context: Mutex<Option<Transaction>>,
    registered: AtomicBool,

    /// Serializes every outbound frame for the session's lifetime.
    send_gate: tokio::sync::Mutex<()>,
    next_state_tx: mpsc::Sender<NextStateInfo>,
    ready_notify: Mutex<Option<oneshot::Sender<bool>>>,
}

impl SessionCore {
    /// Send one frame to the worker under the send gate.
    pub async fn serial_send(&self, msg: ChaincodeMessage) -> Result<(), SessionError> {
        let _gate = self.send_gate.lock().await;
        if let Err(e) = self.stream.send(msg.clone()).await {
            error!(
                tx = short_id(&msg.tx_id),
                msg_type = %msg.msg_type,
                error = %e,
                "failed to send frame"
            );
            return Err(e.into());
        }
        Ok(())
    }

    /// Post a state-driving event to the pump.
    pub async fn trigger_next_state(&self, msg: ChaincodeMessage, send_to_worker: bool) {
        let info = NextStateInfo {
            msg,
            send_to_worker,
        };
        if self.next_state_tx.send(info).await.is_err() {
            warn!("pump gone, dropping state-driving event");
        }
    }

    /// Resolve the handshake waiter. One-shot: the first notification wins,
    /// later ones are dropped.
    pub fn notify_during_startup(&self, ok: bool) {
        match self.ready_notify.lock().take() {
            Some(sender) => {
                debug!(ok, "notifying handshake waiter");
                let _ = sender.send(ok);
            }
            None => debug!("no handshake waiter to notify"),
        }
    }

    /// Registered chaincode name.
    pub fn chaincode_name(&self) -> Result<String, SessionError> {
        self.chaincode_id
            .lock()
            .as_ref()
            .map(|id| id.name.clone())
            .ok_or(SessionError::NotRegistered)
    }

    pub fn state(&self) -> SessionState {
        self.fsm.lock().current()
    }

    fn set_chaincode_id(&self, id: ChaincodeId) {
        *self.chaincode_id.lock() = Some(id);
    }

    fn deregister(&self) {
        if self.registered.swap(false, Ordering::SeqCst) {
            if let Ok(name) = self.chaincode_name() {
                debug!(chaincode = %name, "deregistering session");
                self.support.deregister(&name);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Crypto mediation
    // -------------------------------------------------------------------------

    /// Encrypt `payload` under the transaction's security context. Identity
    /// when no security helper is configured.
    pub fn encrypt(&self, tx_id: &str, payload: Vec<u8>) -> Result<Vec<u8>, SessionError> {
        self.encrypt_or_decrypt(true, tx_id, payload)
    }

    /// Decrypt `payload` under the transaction's security context. Identity
    /// when no security helper is configured.
    pub fn decrypt(&self, tx_id: &str, payload: Vec<u8>) -> Result<Vec<u8>, SessionError> {
        self.encrypt_or_decrypt(false, tx_id, payload)
    }

    fn encrypt_or_decrypt(
        &self,
        encrypt: bool,
        tx_id: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, SessionError> {
        let Some(helper) = self.support.security_helper() else {
            return Ok(payload);
        };

        let sec = self
            .registry
            .sec_context(tx_id)
            .ok_or_else(|| SessionError::MissingContext(tx_id.to_string()))?
            .ok_or_else(|| SessionError::MissingSecContext(tx_id.to_string()))?;

        let deploy = self
            .deploy_sec_context
            .lock()
            .clone()
            .ok_or_else(|| SessionError::MissingSecContext(tx_id.to_string()))?;

        let encryptor = match sec.tx_type {
            // The deploy transaction is its own encryption anchor.
            shared_types::TransactionType::Deploy => {
                helper.state_encryptor(&deploy, &deploy)?
            }
            shared_types::TransactionType::Execute | shared_types::TransactionType::Query => {
                helper.state_encryptor(&deploy, &sec)?
            }
        };

        let out = if encrypt {
            encryptor.encrypt(&payload)?
        } else {
            encryptor.decrypt(&payload)?
        };
        Ok(out)
    }

    /// Install the deploy security context: a wire-format deep clone of the
    /// deploying transaction with the code package stripped and the
    /// filesystem path erased from its chaincode identity. Gated on first
    /// use; repeated handshakes keep the original context.
    fn initialize_sec_context(
        &self,
        tx: &Transaction,
        deploy_tx: Option<&Transaction>,
    ) -> Result<(), SessionError> {
        let mut slot = self.deploy_sec_context.lock();
        if slot.is_some() {
            return Ok(());
        }

        // No deploy descriptor means `tx` itself is the deploy.
        let mut sec = match deploy_tx {
            Some(dep) => dep.clone_via_wire()?,
            None => tx.clone_via_wire()?,
        };

        // The code package is large and useless as key material.
        sec.payload = Vec::new();

        // Downstream transactions carry no path; erase it so contexts agree.
        let mut cc_id = sec.decode_chaincode_id()?;
        cc_id.path = String::new();
        sec.chaincode_id = encode(&cc_id)?;

        *slot = Some(sec);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Host entry points (shared with SessionHandle)
    // -------------------------------------------------------------------------

    async fn init_or_ready(
        &self,
        tx_id: &str,
        init: Option<ChaincodeInput>,
        tx: Transaction,
        deploy_tx: Option<Transaction>,
    ) -> Result<mpsc::Receiver<ChaincodeMessage>, SessionError> {
        let receiver = self.registry.create_context(tx_id, Some(tx.clone()))?;

        let (msg, send_to_worker) = match init {
            Some(input) => {
                debug!(tx = short_id(tx_id), "driving INIT");
                let msg = match ChaincodeMessage::init(tx_id, &input) {
                    Ok(msg) => msg,
                    Err(e) => {
                        self.registry.delete_context(tx_id);
                        return Err(e.into());
                    }
                };
                // `enter_init` forwards the frame once the transition is
                // complete; the pump must not send it a second time.
                (msg, false)
            }
            None => {
                debug!(tx = short_id(tx_id), "driving READY");
                (ChaincodeMessage::ready(tx_id), true)
            }
        };

        if let Err(e) = self.initialize_sec_context(&tx, deploy_tx.as_ref()) {
            self.registry.delete_context(tx_id);
            return Err(e);
        }

        self.trigger_next_state(msg, send_to_worker).await;
        Ok(receiver)
    }

    async fn send_execute(
        &self,
        msg: ChaincodeMessage,
        tx: Option<Transaction>,
    ) -> Result<mpsc::Receiver<ChaincodeMessage>, SessionError> {
        let tx_id = msg.tx_id.clone();
        let receiver = self.registry.create_context(&tx_id, tx)?;

        debug!(tx = short_id(&tx_id), msg_type = %msg.msg_type, "dispatching execute");
        self.registry
            .mark_transaction(&tx_id, msg.msg_type != MessageType::Query);

        if msg.msg_type == MessageType::Transaction {
            // Transactions drive the state machine.
            self.trigger_next_state(msg, true).await;
        } else {
            // Queries go straight to the worker.
            if let Err(e) = self.serial_send(msg).await {
                self.registry.delete_context(&tx_id);
                return Err(e);
            }
        }

        Ok(receiver)
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cheap cloneable handle to a session, held by the support plane's registry
/// and by hosts that begin transactions against this chaincode.
#[derive(Clone)]
pub struct SessionHandle {
    core: Arc<SessionCore>,
}

impl SessionHandle {
    /// Name the session registered under, once REGISTER was accepted.
    #[must_use]
    pub fn chaincode_name(&self) -> Option<String> {
        self.core.chaincode_name().ok()
    }

    /// True when the session is past registration and initialization.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.core.state().is_running()
    }

    /// Begin the first transaction against this chaincode. With `init`
    /// arguments the session drives INIT (deploy); without, it drives READY.
    /// The returned channel yields the terminal frame for `tx_id`.
    pub async fn init_or_ready(
        &self,
        tx_id: &str,
        init: Option<ChaincodeInput>,
        tx: Transaction,
        deploy_tx: Option<Transaction>,
    ) -> Result<mpsc::Receiver<ChaincodeMessage>, SessionError> {
        self.core.init_or_ready(tx_id, init, tx, deploy_tx).await
    }

    /// Dispatch a TRANSACTION or QUERY frame. The returned channel yields
    /// the terminal frame for the frame's transaction id.
    pub async fn send_execute(
        &self,
        msg: ChaincodeMessage,
        tx: Option<Transaction>,
    ) -> Result<mpsc::Receiver<ChaincodeMessage>, SessionError> {
        self.core.send_execute(msg, tx).await
    }

    /// Drop the transaction context for `tx_id`. Callers do this after
    /// consuming the rendezvous or failing to enter the transaction.
    pub fn delete_context(&self, tx_id: &str) {
        self.core.registry.delete_context(tx_id);
    }
}

// =============================================================================
// HANDLER
// =============================================================================

/// Peer-side owner of one chaincode stream.
pub struct Handler {
    core: Arc<SessionCore>,
    next_state_rx: mpsc::Receiver<NextStateInfo>,
}

impl Handler {
    /// Build a handler for `stream`. The returned receiver resolves when the
    /// handshake succeeds (`true`) or fails (`false`).
    pub fn new(
        stream: Arc<dyn ChaincodeStream>,
        support: Arc<dyn SupportPlane>,
        ledger: Arc<dyn Ledger>,
    ) -> (Self, oneshot::Receiver<bool>) {
        let (ready_tx, ready_rx) = oneshot::channel();
        // Rendezvous-sized so background tasks queue at most one drive event
        // ahead of the pump.
        let (next_state_tx, next_state_rx) = mpsc::channel(1);

        let core = Arc::new(SessionCore {
            stream,
            support,
            ledger,
            registry: ContextRegistry::default(),
            fsm: Mutex::new(Fsm::new()),
            chaincode_id: Mutex::new(None),
            deploy_sec_context: Mutex::new(None),
            registered: AtomicBool::new(false),
            send_gate: tokio::sync::Mutex::new(()),
            next_state_tx,
            ready_notify: Mutex::new(Some(ready_tx)),
        });

        (
            Self {
                core,
                next_state_rx,
            },
            ready_rx,
        )
    }

    /// Handle shared with the support plane and hosts.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            core: Arc::clone(&self.core),
        }
    }

    /// Run the pump until the stream terminates. Always deregisters the
    /// session and releases every outstanding waiter on the way out.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let result = self.process_stream().await;
        self.core.deregister();
        self.core.registry.abort_all("chaincode stream terminated");
        result
    }

    /// Pump loop: single reader of the stream, single driver of the state
    /// machine. A companion task performs exactly one `recv` per awaited
    /// frame and is not respawned until that frame has been processed.
    async fn process_stream(&mut self) -> Result<(), SessionError> {
        let (frame_tx, mut frame_rx) =
            mpsc::channel::<Result<Option<ChaincodeMessage>, StreamError>>(1);
        let mut recv_in_flight = false;

        loop {
            if !recv_in_flight {
                recv_in_flight = true;
                let stream = Arc::clone(&self.core.stream);
                let publish = frame_tx.clone();
                tokio::spawn(async move {
                    let _ = publish.send(stream.recv().await).await;
                });
            }

            let (msg, forward) = tokio::select! {
                inbound = frame_rx.recv() => {
                    recv_in_flight = false;
                    match inbound {
                        Some(Ok(Some(msg))) => {
                            debug!(
                                tx = short_id(&msg.tx_id),
                                msg_type = %msg.msg_type,
                                "received frame from worker"
                            );
                            if msg.msg_type == MessageType::Error {
                                debug!(payload = %msg.payload_text(), "worker reported error");
                            }
                            (msg, false)
                        }
                        Some(Ok(None)) => {
                            debug!("received EOF, ending chaincode stream");
                            return Err(StreamError::Closed.into());
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "stream receive failed");
                            return Err(e.into());
                        }
                        // The companion task cannot outlive this loop while
                        // frame_tx is held; treat closure as transport loss.
                        None => return Err(StreamError::Closed.into()),
                    }
                }
                drive = self.next_state_rx.recv() => {
                    match drive {
                        Some(info) => {
                            debug!(
                                tx = short_id(&info.msg.tx_id),
                                msg_type = %info.msg.msg_type,
                                "state-driving event"
                            );
                            (info.msg, info.send_to_worker)
                        }
                        // All senders live in the core we hold; unreachable
                        // in practice, fatal if it ever happens.
                        None => return Err(StreamError::Closed.into()),
                    }
                }
            };

            let echo = forward.then(|| msg.clone());

            if let Err(e) = self.handle_message(msg).await {
                error!(error = %e, "error handling message, ending stream");
                return Err(e);
            }

            if let Some(msg) = echo {
                self.core.serial_send(msg).await?;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Message handling
    // -------------------------------------------------------------------------

    /// Dispatch one frame: out-of-band types first, then the admissibility
    /// gate, then the state machine with its callbacks.
    async fn handle_message(&self, msg: ChaincodeMessage) -> Result<(), SessionError> {
        let state = self.core.state();
        debug!(
            tx = short_id(&msg.tx_id),
            msg_type = %msg.msg_type,
            state = %state,
            "handling frame"
        );

        match msg.msg_type {
            // Terminal result of a stateless query: encrypt the result under
            // the query's context and hand it to the waiter.
            MessageType::QueryCompleted => {
                let mut msg = msg;
                self.core.registry.clear_transaction(&msg.tx_id);
                match self.core.encrypt(&msg.tx_id, msg.payload.clone()) {
                    Ok(sealed) => msg.payload = sealed,
                    Err(e) => {
                        debug!(tx = short_id(&msg.tx_id), error = %e, "failed to encrypt query result");
                        msg.payload =
                            format!("failed to encrypt query result: {e}").into_bytes();
                        msg.msg_type = MessageType::QueryError;
                    }
                }
                self.core.registry.notify(&msg);
                return Ok(());
            }
            MessageType::QueryError => {
                debug!(
                    tx = short_id(&msg.tx_id),
                    payload = %msg.payload_text(),
                    "query failed"
                );
                self.core.registry.clear_transaction(&msg.tx_id);
                self.core.registry.notify(&msg);
                return Ok(());
            }
            // Nested query: served by a background task, never by the FSM.
            MessageType::InvokeQuery => {
                tokio::spawn(actions::handle_query_chaincode(
                    Arc::clone(&self.core),
                    msg,
                ));
                return Ok(());
            }
            _ => {}
        }

        if !self.core.fsm.lock().can_handle(msg.msg_type) {
            // Write-class frames rejected because the transaction is really
            // a query get an ERROR answer before the session terminates.
            if msg.msg_type.is_write_class() && !self.core.registry.is_transaction(&msg.tx_id) {
                let text = format!("cannot handle {} in query context", msg.msg_type);
                debug!(tx = short_id(&msg.tx_id), "{text}");
                self.core
                    .serial_send(ChaincodeMessage::error(&msg.tx_id, &text))
                    .await?;
                return Err(SessionError::QueryContextViolation {
                    msg_type: msg.msg_type,
                });
            }
            return Err(SessionError::Inadmissible {
                state,
                msg_type: msg.msg_type,
                payload_len: msg.payload.len(),
            });
        }

        self.fire_event(msg).await
    }

    /// Run before-callbacks, advance the machine, then run after-event and
    /// state-entry callbacks. A before-callback error cancels the transition
    /// with a cause and propagates.
    async fn fire_event(&self, msg: ChaincodeMessage) -> Result<(), SessionError> {
        match msg.msg_type {
            MessageType::Register => self.before_register(&msg).await?,
            MessageType::Init => {
                // The launcher is unblocked before the INIT frame goes out.
                self.core.notify_during_startup(true);
            }
            MessageType::Completed => {
                debug!(
                    tx = short_id(&msg.tx_id),
                    "completion received, will notify from ready state"
                );
            }
            _ => {}
        }

        let advance = self.core.fsm.lock().advance(msg.msg_type);
        let Some(advance) = advance else {
            // can_handle was consulted; the table cannot have changed since.
            return Err(SessionError::Inadmissible {
                state: self.core.state(),
                msg_type: msg.msg_type,
                payload_len: msg.payload.len(),
            });
        };

        // After-event effects: reads run in background tasks so the
        // transition is complete before any ledger I/O happens.
        match msg.msg_type {
            MessageType::GetState => {
                tokio::spawn(actions::handle_get_state(Arc::clone(&self.core), msg.clone()));
            }
            MessageType::RangeQueryState => {
                tokio::spawn(actions::handle_range_query(
                    Arc::clone(&self.core),
                    msg.clone(),
                ));
            }
            MessageType::RangeQueryStateNext => {
                tokio::spawn(actions::handle_range_query_next(
                    Arc::clone(&self.core),
                    msg.clone(),
                ));
            }
            MessageType::RangeQueryStateClose => {
                tokio::spawn(actions::handle_range_query_close(
                    Arc::clone(&self.core),
                    msg.clone(),
                ));
            }
            _ => {}
        }

        let Advance::Moved { from, to } = advance else {
            return Ok(());
        };
        debug!(from = %from, to = %to, "state changed");

        match to {
            SessionState::Established => self.core.notify_during_startup(true),
            SessionState::Init => self.enter_init(&msg).await,
            SessionState::Ready => self.enter_ready(&msg),
            SessionState::BusyInit | SessionState::BusyXact => {
                tokio::spawn(actions::enter_busy(Arc::clone(&self.core), msg));
            }
            SessionState::End => {
                return self.enter_end(&msg);
            }
            _ => {}
        }
        Ok(())
    }

    /// Decode the chaincode identity and claim a registry slot. Any failure
    /// cancels the handshake and resolves the waiter negatively.
    async fn before_register(&self, msg: &ChaincodeMessage) -> Result<(), SessionError> {
        let cc_id: ChaincodeId = match shared_types::payloads::decode(&msg.payload) {
            Ok(id) => id,
            Err(e) => {
                self.core.notify_during_startup(false);
                return Err(e.into());
            }
        };
        debug!(chaincode = %cc_id.name, "REGISTER received");
        self.core.set_chaincode_id(cc_id.clone());

        if let Err(e) = self.core.support.register(self.handle()) {
            self.core.notify_during_startup(false);
            return Err(e.into());
        }
        self.core.registered.store(true, Ordering::SeqCst);

        if let Err(e) = self.core.serial_send(ChaincodeMessage::registered()).await {
            self.core.notify_during_startup(false);
            return Err(e);
        }
        debug!(chaincode = %cc_id.name, "sent REGISTERED");
        Ok(())
    }

    /// First entry into `init` forwards the INIT frame to the worker and
    /// marks its transaction id as a real transaction so writes are allowed
    /// during initialization.
    async fn enter_init(&self, msg: &ChaincodeMessage) {
        if msg.msg_type != MessageType::Init {
            return;
        }
        self.core.registry.mark_transaction(&msg.tx_id, true);
        if self.core.serial_send(msg.clone()).await.is_err() {
            let err = ChaincodeMessage::error(&msg.tx_id, "failed to send INIT to worker");
            self.core.registry.notify(&err);
        }
    }

    /// Entry into `ready` delivers the driving frame to its waiter and
    /// closes any cursors the transaction left behind.
    fn enter_ready(&self, msg: &ChaincodeMessage) {
        self.core.registry.clear_transaction(&msg.tx_id);
        self.core.registry.notify(msg);
    }

    /// Terminal state: deregister and surface the end of the session.
    fn enter_end(&self, msg: &ChaincodeMessage) -> Result<(), SessionError> {
        self.core.registry.clear_transaction(&msg.tx_id);
        self.core.registry.notify(msg);
        self.core.deregister();
        Err(SessionError::SessionEnded)
    }
}

/// Run a session for one worker stream: construct the handler and pump until
/// the stream terminates. The handler registers itself with `support` when
/// the worker's REGISTER arrives.
pub async fn handle_chaincode_stream(
    support: Arc<dyn SupportPlane>,
    ledger: Arc<dyn Ledger>,
    stream: Arc<dyn ChaincodeStream>,
) -> Result<(), SessionError> {
    let (handler, _ready) = Handler::new(stream, support, ledger);
    handler.run().await
}

// =============================================================================
// TESTS
// =============================================================================
