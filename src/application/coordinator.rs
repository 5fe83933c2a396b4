//! Top-level mixer service: owns the session registry and the identity,
//! reacts to transport events, lobby deliveries and retry ticks. Every
//! mutation happens on the event loop driving `handle_event`.

use crate::application::budget::track_budget;
use crate::application::matchmaker::{self, OpeningAnswer};
use crate::application::retry::RetryScheduler;
use crate::application::runtime::{MixerEvent, TransportEvent};
use crate::application::signer::SignerBridge;
use crate::domain::protocol::{decode_tx_hex, encode_tx_hex, version_fixed_clone, JoinProtocol, TwoPartyJoin};
use crate::domain::{CandidateReply, Delivery, LobbyMessage, MixTask, PeerInfo, Role, Session, SessionState, TaskState};
use crate::foundation::util::time::{Clock, SystemClock};
use crate::foundation::{SessionId, LIVENESS_DIVISOR, SAFE_NS_MIXER, TASK_KIND_MIXER};
use crate::infrastructure::channel::{ChannelGateway, Lobby};
use crate::infrastructure::config::MixerConfig;
use crate::infrastructure::gui::{GuiBus, NoopGui, GUI_ANNOUNCING, GUI_SENDING_NO_MIXING};
use crate::infrastructure::identity::{Identity, IdentityStore};
use crate::infrastructure::safe::{pocket_key, Safe};
use crate::infrastructure::wallet::Wallet;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// What an announce re-check tick decided to do.
enum Tick {
    Gone,
    Fallback,
    Select(CandidateReply),
    Resend,
    Refresh(MixTask),
    Watch,
    Stop,
}

pub struct Coordinator {
    config: MixerConfig,
    gateway: ChannelGateway,
    wallet: Arc<dyn Wallet>,
    safe: Arc<dyn Safe>,
    store: Arc<dyn IdentityStore>,
    gui: Arc<dyn GuiBus>,
    clock: Arc<dyn Clock>,
    protocol: Arc<dyn JoinProtocol>,
    signer: SignerBridge,
    identity: Identity,
    registry: HashMap<SessionId, Session>,
    retry: RetryScheduler,
    channel_task: Option<JoinHandle<()>>,
    events: UnboundedSender<MixerEvent>,
}

impl Coordinator {
    pub fn new(
        config: MixerConfig,
        lobby: Arc<dyn Lobby>,
        wallet: Arc<dyn Wallet>,
        safe: Arc<dyn Safe>,
        store: Arc<dyn IdentityStore>,
        identity: Identity,
        events: UnboundedSender<MixerEvent>,
    ) -> Self {
        let gateway = ChannelGateway::new(lobby, &config.network);
        let signer = SignerBridge::new(Arc::clone(&wallet), Arc::clone(&safe));
        let retry = RetryScheduler::new(events.clone());
        debug!(channel = gateway.channel(), "coordinator created");
        Self {
            config,
            gateway,
            wallet,
            safe,
            store,
            gui: Arc::new(NoopGui),
            clock: Arc::new(SystemClock),
            protocol: Arc::new(TwoPartyJoin),
            signer,
            identity,
            registry: HashMap::new(),
            retry,
            channel_task: None,
            events,
        }
    }

    pub fn with_gui(mut self, gui: Arc<dyn GuiBus>) -> Self {
        self.gui = gui;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_protocol(mut self, protocol: Arc<dyn JoinProtocol>) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn channel_name(&self) -> &str {
        self.gateway.channel()
    }

    pub fn channel_open(&self) -> bool {
        self.channel_task.is_some()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    pub fn session_state(&self, id: SessionId) -> Option<SessionState> {
        self.registry.get(&id).map(|session| session.state())
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.registry.keys().copied().collect()
    }

    pub async fn handle_event(&mut self, event: MixerEvent) {
        match event {
            MixerEvent::Transport(transport) => self.handle_transport_event(transport).await,
            MixerEvent::Lobby(delivery) => self.handle_delivery(delivery).await,
            MixerEvent::RetryTick(id) => self.check_announce(id).await,
        }
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                info!("transport connected");
                self.check_mixing().await;
                self.resume_tasks().await;
            }
            TransportEvent::Disconnect | TransportEvent::Disconnected => {
                let dropped = self.registry.len();
                self.registry.clear();
                self.retry.cancel_all();
                if let Some(handle) = self.channel_task.take() {
                    handle.abort();
                }
                info!(dropped, "transport down, in-flight sessions dropped");
            }
        }
    }

    /// Walk every pocket: demote the ones whose mixing password expired,
    /// then open or close the lobby channel depending on remaining work.
    pub async fn check_mixing(&mut self) {
        let safe = Arc::clone(&self.safe);
        let mut demoted = false;
        for pocket in &mut self.identity.pockets {
            if pocket.mixing && pocket.has_key_material() && safe.get(SAFE_NS_MIXER, &pocket_key(pocket.index)).is_none() {
                info!(pocket = pocket.index, "mixing password expired, demoting pocket");
                pocket.demote();
                demoted = true;
            }
        }
        if demoted {
            self.save_identity();
        }
        if self.identity.any_pocket_mixing() || !self.identity.tasks.is_empty() {
            self.ensure_channel().await;
        } else {
            self.close_channel().await;
        }
    }

    pub async fn resume_tasks(&mut self) {
        let tasks = self.identity.tasks.clone();
        info!(count = tasks.len(), "resuming persisted mixer tasks");
        for task in tasks {
            self.start_task(task).await;
        }
    }

    /// Dispatch a task by its persisted state. Only `announce` starts a
    /// session; the other states are accepted without action.
    pub async fn start_task(&mut self, mut task: MixTask) {
        match task.state {
            TaskState::Announce => {
                if let Some(existing) = task.session {
                    if self.registry.contains_key(&existing) {
                        debug!(session_id = %existing, "task already has an active session");
                        return;
                    }
                }
                let prepared = match decode_tx_hex(&task.tx) {
                    Ok(tx) => tx,
                    Err(err) => {
                        warn!(error = %err, "task transaction is unreadable, skipping");
                        return;
                    }
                };
                let my_tx = version_fixed_clone(&prepared);
                if task.timeout.is_none() {
                    task.timeout = Some(self.config.default_task_timeout_secs);
                }
                let now = self.clock.now_secs();
                if task.start == 0 {
                    task.start = now;
                    task.ping = now;
                }
                let mut rng = rand::thread_rng();
                let id = SessionId::generate(&mut rng);
                // Announce either the change or the total, so the announced
                // figure does not reveal which side of the split joins.
                let amount = match task.change {
                    Some(change) if rng.gen_bool(0.5) => change,
                    _ => task.total,
                };
                task.session = Some(id);
                self.persist_task(task.clone());
                self.save_identity();
                let session = Session::initiator(id, my_tx, amount, task);
                self.registry.insert(id, session);
                info!(session_id = %id, amount, "announcing new join");
                self.announce(id).await;
            }
            other => {
                debug!(state = %other, "task state requires no action");
            }
        }
    }

    async fn announce(&mut self, id: SessionId) {
        let Some((amount, state)) = self.registry.get(&id).map(|s| (s.my_amount, s.state().to_string())) else {
            return;
        };
        self.ensure_channel().await;
        self.gateway.post_encrypted(&LobbyMessage::CoinJoinOpen { id, amount }).await;
        self.gui.post_mixer_state(&state);
        self.retry.schedule(id, Duration::from_secs(self.config.announce_retry_secs));
    }

    /// The 10-second re-check: resend, select, cancel or stop.
    pub async fn check_announce(&mut self, id: SessionId) {
        let tick = {
            match self.registry.get_mut(&id) {
                None => Tick::Gone,
                Some(session) => {
                    let now = self.clock.now_secs();
                    let hard_mixing = self.identity.settings.hard_mixing;
                    match session.task.clone() {
                        None => Tick::Stop,
                        Some(task) => {
                            let timeout = task.timeout_secs();
                            let expired = now.saturating_sub(task.start) > timeout;
                            if expired && !hard_mixing {
                                Tick::Fallback
                            } else if session.state() == SessionState::Announce && session.received_len() > 0 {
                                let mut rng = rand::thread_rng();
                                match matchmaker::choose_candidate(&mut rng, session.take_received()) {
                                    Some(candidate) => Tick::Select(candidate),
                                    None => Tick::Resend,
                                }
                            } else if session.state() == SessionState::Announce {
                                Tick::Resend
                            } else if session.state() != SessionState::Finished {
                                if now.saturating_sub(task.ping) > timeout / LIVENESS_DIVISOR {
                                    Tick::Refresh(task)
                                } else {
                                    Tick::Watch
                                }
                            } else {
                                Tick::Stop
                            }
                        }
                    }
                }
            }
        };

        let retry_delay = Duration::from_secs(self.config.announce_retry_secs);
        match tick {
            Tick::Gone | Tick::Stop => self.retry.clear(id),
            Tick::Fallback => self.fallback(id).await,
            Tick::Select(candidate) => {
                info!(session_id = %id, "candidate selected from buffer");
                self.retry.schedule(id, retry_delay);
                self.process_coin_join(id, candidate.tx_hex, candidate.peer).await;
            }
            Tick::Resend => {
                let Some(amount) = self.registry.get(&id).map(|s| s.my_amount) else {
                    return;
                };
                debug!(session_id = %id, "no candidates yet, re-announcing");
                self.gateway.post_encrypted(&LobbyMessage::CoinJoinOpen { id, amount }).await;
                self.gui.post_mixer_state(GUI_ANNOUNCING);
                self.retry.schedule(id, retry_delay);
            }
            Tick::Refresh(mut task) => {
                warn!(session_id = %id, "session lost liveness, posting a fresh announcement");
                if let Some(mut session) = self.registry.remove(&id) {
                    session.cancel();
                }
                self.retry.clear(id);
                self.gui.post_mixer_state(&SessionState::Cancelled.to_string());
                task.state = TaskState::Announce;
                task.session = None;
                self.persist_task(task.clone());
                self.save_identity();
                self.start_task(task).await;
            }
            Tick::Watch => self.retry.schedule(id, retry_delay),
        }
    }

    /// Announce-phase timeout with `hard_mixing` off: the funds still move,
    /// unmixed, through the wallet's fallback path.
    async fn fallback(&mut self, id: SessionId) {
        let Some(mut session) = self.registry.remove(&id) else {
            return;
        };
        session.cancel();
        self.retry.clear(id);
        let Some(task) = session.task.clone() else {
            return;
        };
        info!(session_id = %id, "mixing timed out, sending without mixing");
        self.remove_task(&task);
        self.save_identity();
        if let Err(err) = self.wallet.send_fallback(TASK_KIND_MIXER, &task).await {
            warn!(session_id = %id, error = %err, "fallback send failed");
        }
        self.gui.post_mixer_state(GUI_SENDING_NO_MIXING);
        self.check_mixing().await;
    }

    async fn handle_delivery(&mut self, delivery: Delivery) {
        if delivery.sender == self.gateway.fingerprint() {
            trace!(kind = delivery.message.kind(), "ignoring own echo");
            return;
        }
        debug!(
            sender = %delivery.sender,
            kind = delivery.message.kind(),
            session_id = %delivery.message.session_id(),
            "lobby message received"
        );
        match delivery.message {
            LobbyMessage::CoinJoinOpen { id, amount } => self.on_open(id, amount, delivery.peer).await,
            LobbyMessage::CoinJoin { id, tx, initial } => self.on_coin_join(id, tx, initial, delivery.peer).await,
            LobbyMessage::CoinJoinFinish { id } => self.on_finish(id).await,
        }
    }

    /// Guest-side matchmaking on an inbound opening.
    async fn on_open(&mut self, id: SessionId, amount: u64, peer: PeerInfo) {
        if !peer.trusted {
            debug!(session_id = %id, "opening from untrusted peer, dropping");
            return;
        }
        if self.registry.contains_key(&id) {
            debug!(session_id = %id, "opening for a known id, dropping");
            return;
        }
        match matchmaker::answer_opening(&self.identity, self.wallet.as_ref(), id, amount, self.config.guest_fee_sats, peer) {
            Ok(Some(OpeningAnswer { session, reply })) => {
                let peer_key = session.peer.as_ref().map(|p| p.pub_key.clone()).unwrap_or_default();
                let state = session.state().to_string();
                self.registry.insert(id, session);
                self.gateway.post_dh(&peer_key, &reply).await;
                self.gui.post_mixer_state(&state);
            }
            Ok(None) => {}
            Err(err) => warn!(session_id = %id, error = %err, "failed to answer opening"),
        }
    }

    async fn on_coin_join(&mut self, id: SessionId, tx: String, initial: bool, peer: PeerInfo) {
        {
            let Some(session) = self.registry.get_mut(&id) else {
                debug!(session_id = %id, "transaction for unknown session, dropping");
                return;
            };
            // While announcing, candidate replies race until the next tick;
            // nothing is processed synchronously.
            if session.state() == SessionState::Announce {
                if initial {
                    if session.push_received(CandidateReply { tx_hex: tx, peer }) {
                        debug!(session_id = %id, buffered = session.received_len(), "candidate reply buffered");
                    }
                } else {
                    debug!(session_id = %id, "non-initial transaction while announcing, dropping");
                }
                return;
            }
        }
        self.process_coin_join(id, tx, peer).await;
    }

    /// Advance the session on a peer transaction and react to the state the
    /// protocol left behind.
    async fn process_coin_join(&mut self, id: SessionId, tx_hex: String, peer: PeerInfo) {
        let protocol = Arc::clone(&self.protocol);
        let (prev, after, forward) = {
            let Some(session) = self.registry.get_mut(&id) else {
                return;
            };
            let prev = session.state();
            match protocol.process(session, &tx_hex, &peer) {
                Ok(outcome) => (prev, session.state(), outcome.updated_tx.map(|tx| encode_tx_hex(&tx))),
                Err(err) => {
                    debug!(session_id = %id, error = %err, "dropping peer transaction");
                    return;
                }
            }
        };

        if after != prev {
            self.sync_task(id);
            self.gui.post_mixer_state(&after.to_string());
        }
        match after {
            SessionState::Accepted | SessionState::Paired => {
                if let Some(tx_hex) = forward {
                    self.forward_to_peer(id, tx_hex).await;
                }
            }
            SessionState::Sign => self.sign_session(id, prev).await,
            SessionState::Finished => self.finish_session(id, prev).await,
            SessionState::Announce | SessionState::Cancelled => {}
        }
        self.check_delete(id);
        self.check_mixing().await;
    }

    /// Gather keys under the live password and sign our inputs. The
    /// transaction returned by the protocol is not forwarded here; what
    /// travels is the refinement carrying our signatures, and the session
    /// leaves `sign` only on the counterparty's next message or by
    /// completing the join as the final signer.
    async fn sign_session(&mut self, id: SessionId, prev: SessionState) {
        let signed = {
            let Some(session) = self.registry.get(&id) else {
                return;
            };
            self.signer.request_sign_inputs(session, &self.identity)
        };
        let refined = match signed {
            Ok(signed_tx) => {
                let protocol = Arc::clone(&self.protocol);
                match self.registry.get_mut(&id) {
                    Some(session) => protocol.apply_signatures(session, signed_tx),
                    None => return,
                }
            }
            Err(err) => Err(err),
        };
        match refined {
            Ok(tx) => {
                self.forward_to_peer(id, encode_tx_hex(&tx)).await;
                let finished = self.registry.get(&id).map(|s| s.state() == SessionState::Finished).unwrap_or(false);
                if finished {
                    self.sync_task(id);
                    self.gui.post_mixer_state(&SessionState::Finished.to_string());
                    self.finish_session(id, prev).await;
                }
            }
            Err(err) => {
                warn!(session_id = %id, error = %err, "signing failed, cancelling session");
                if let Some(session) = self.registry.get_mut(&id) {
                    session.cancel();
                }
                self.gui.post_mixer_state(&SessionState::Cancelled.to_string());
            }
        }
    }

    /// Terminal success: the initiator broadcasts, the guest charges its
    /// budget. Guarded so the budget is applied exactly once.
    async fn finish_session(&mut self, id: SessionId, prev: SessionState) {
        if prev == SessionState::Finished {
            return;
        }
        let outcome = {
            let Some(session) = self.registry.get_mut(&id) else {
                return;
            };
            match session.role {
                Role::Initiator => {
                    let final_tx = session.tx.clone();
                    match session.task.as_mut() {
                        Some(task) => {
                            task.tx = encode_tx_hex(&final_tx);
                            task.state = TaskState::Finished;
                            Some((Some((final_tx, task.clone())), None))
                        }
                        None => None,
                    }
                }
                Role::Guest => Some((None, session.pocket.map(|pocket| (pocket, session.fee)))),
            }
        };
        let Some((broadcast, budget)) = outcome else {
            return;
        };
        if let Some((final_tx, task)) = broadcast {
            self.persist_task(task.clone());
            self.save_identity();
            info!(session_id = %id, "joint transaction complete, broadcasting");
            if let Err(err) = self.wallet.broadcast_tx(&final_tx, &task).await {
                warn!(session_id = %id, error = %err, "broadcast failed");
            }
        }
        if let Some((pocket, fee)) = budget {
            if let Err(err) = track_budget(&mut self.identity, self.store.as_ref(), pocket, fee) {
                warn!(session_id = %id, pocket, error = %err, "failed to persist budget update");
            }
        }
    }

    /// Peer-signalled termination.
    async fn on_finish(&mut self, id: SessionId) {
        {
            let Some(session) = self.registry.get_mut(&id) else {
                debug!(session_id = %id, "finish for unknown session, dropping");
                return;
            };
            info!(session_id = %id, "peer terminated the join");
            session.cancel();
        }
        self.gui.post_mixer_state(&SessionState::Cancelled.to_string());
        self.check_delete(id);
        self.check_mixing().await;
    }

    fn check_delete(&mut self, id: SessionId) {
        let terminal = self.registry.get(&id).map(|session| session.is_terminal()).unwrap_or(false);
        if terminal {
            self.registry.remove(&id);
            self.retry.clear(id);
            debug!(session_id = %id, "terminal session removed from registry");
        }
    }

    async fn forward_to_peer(&mut self, id: SessionId, tx_hex: String) {
        let Some(peer_key) = self.registry.get(&id).and_then(|s| s.peer.as_ref().map(|p| p.pub_key.clone())) else {
            return;
        };
        self.gateway.post_dh(&peer_key, &LobbyMessage::CoinJoin { id, tx: tx_hex, initial: false }).await;
    }

    /// Keep the persisted task in step with the session for crash recovery.
    fn sync_task(&mut self, id: SessionId) {
        let now = self.clock.now_secs();
        let task = {
            let Some(session) = self.registry.get_mut(&id) else {
                return;
            };
            let state = session.state();
            let Some(task) = session.task.as_mut() else {
                return;
            };
            task.touch(now);
            if let Some(task_state) = task_state_for(state) {
                task.state = task_state;
            }
            task.clone()
        };
        self.persist_task(task);
        self.save_identity();
    }

    fn persist_task(&mut self, task: MixTask) {
        let position = self
            .identity
            .tasks
            .iter()
            .position(|t| (task.session.is_some() && t.session == task.session) || t.tx == task.tx);
        match position {
            Some(index) => self.identity.tasks[index] = task,
            None => self.identity.tasks.push(task),
        }
    }

    fn remove_task(&mut self, task: &MixTask) {
        self.identity.tasks.retain(|t| !((task.session.is_some() && t.session == task.session) || t.tx == task.tx));
    }

    fn save_identity(&mut self) {
        if let Err(err) = self.store.save(&self.identity) {
            warn!(error = %err, "failed to persist identity");
        }
    }

    async fn ensure_channel(&mut self) {
        if self.channel_task.is_some() {
            return;
        }
        match self.gateway.open().await {
            Ok(mut subscription) => {
                let events = self.events.clone();
                let handle = tokio::spawn(async move {
                    while let Some(event) = subscription.next().await {
                        if let Some(delivery) = ChannelGateway::decode(event) {
                            if events.send(MixerEvent::Lobby(delivery)).is_err() {
                                break;
                            }
                        }
                    }
                });
                self.channel_task = Some(handle);
                info!(channel = self.gateway.channel(), "lobby channel enabled");
            }
            Err(err) => warn!(channel = self.gateway.channel(), error = %err, "failed to open lobby channel"),
        }
    }

    async fn close_channel(&mut self) {
        if let Some(handle) = self.channel_task.take() {
            handle.abort();
            self.gateway.close().await;
            info!(channel = self.gateway.channel(), "lobby channel closed");
        }
    }
}

fn task_state_for(state: SessionState) -> Option<TaskState> {
    match state {
        SessionState::Announce => Some(TaskState::Announce),
        SessionState::Accepted | SessionState::Paired => Some(TaskState::Paired),
        SessionState::Sign => Some(TaskState::Finish),
        SessionState::Finished => Some(TaskState::Finished),
        SessionState::Cancelled => None,
    }
}
