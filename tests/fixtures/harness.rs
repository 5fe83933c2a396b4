#![allow(dead_code)]

use crate::fixtures::builders::outpoint_key;
use crate::fixtures::constants::{MIXER_FINGERPRINT, MIXER_PUB_KEY, TEST_CHANNEL, TEST_NETWORK};
use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use futures_util::FutureExt;
use mixer_core::application::{event_channel, Coordinator, MixerEvent, TransportEvent};
use mixer_core::domain::{LobbyMessage, MixTask};
use mixer_core::foundation::util::time::Clock;
use mixer_core::foundation::Result;
use mixer_core::infrastructure::channel::mock::{MockHub, MockLobby};
use mixer_core::infrastructure::channel::{ChannelEvent, Lobby, LobbySubscription};
use mixer_core::infrastructure::config::MixerConfig;
use mixer_core::infrastructure::gui::GuiBus;
use mixer_core::infrastructure::identity::{Identity, IdentityStore};
use mixer_core::infrastructure::safe::MemorySafe;
use mixer_core::infrastructure::wallet::{Recipient, SigningKey, Wallet, WalletAddress, WalletOutput};
use mixer_core::MixerError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;

pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self { now: AtomicU64::new(start) }
    }

    pub fn add(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub struct RecordingGui {
    pub states: Mutex<Vec<String>>,
}

impl RecordingGui {
    pub fn new() -> Self {
        Self { states: Mutex::new(Vec::new()) }
    }

    pub fn saw(&self, state: &str) -> bool {
        self.states.lock().expect("gui lock").iter().any(|s| s == state)
    }
}

impl GuiBus for RecordingGui {
    fn post_mixer_state(&self, state: &str) {
        self.states.lock().expect("gui lock").push(state.to_string());
    }
}

pub struct RecordingStore {
    pub saves: AtomicU64,
    pub last: Mutex<Option<Identity>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self { saves: AtomicU64::new(0), last: Mutex::new(None) }
    }

    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }
}

impl IdentityStore for RecordingStore {
    fn save(&self, identity: &Identity) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().expect("store lock") = Some(identity.clone());
        Ok(())
    }
}

/// Wallet backed by plain maps, enough to drive every mixer path.
pub struct MockWallet {
    pub utxos: Mutex<HashMap<u32, Vec<(OutPoint, u64, String)>>>,
    pub outputs: Mutex<HashMap<String, WalletOutput>>,
    pub addresses: Mutex<HashMap<String, WalletAddress>>,
    pub balances: Mutex<HashMap<u32, u64>>,
    pub broadcasts: Mutex<Vec<Transaction>>,
    pub fallbacks: Mutex<Vec<MixTask>>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self {
            utxos: Mutex::new(HashMap::new()),
            outputs: Mutex::new(HashMap::new()),
            addresses: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            broadcasts: Mutex::new(Vec::new()),
            fallbacks: Mutex::new(Vec::new()),
        }
    }

    /// Register a spendable coin on `pocket`: utxo list, output index,
    /// balance and address metadata stay consistent.
    pub fn fund_pocket(&self, pocket: u32, out: OutPoint, value: u64, address: &str, path: Vec<u32>) {
        self.utxos.lock().expect("utxos").entry(pocket).or_default().push((out, value, address.to_string()));
        self.outputs
            .lock()
            .expect("outputs")
            .insert(outpoint_key(&out), WalletOutput { address: Some(address.to_string()), value });
        self.addresses
            .lock()
            .expect("addresses")
            .insert(address.to_string(), WalletAddress { index: path, kind: mixer_core::infrastructure::wallet::AddressKind::KeyHash });
        *self.balances.lock().expect("balances").entry(pocket).or_default() += value;
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().expect("broadcasts").len()
    }

    pub fn fallback_count(&self) -> usize {
        self.fallbacks.lock().expect("fallbacks").len()
    }
}

#[async_trait]
impl Wallet for MockWallet {
    fn prepare(&self, pocket: u32, recipients: &[Recipient], change_address: &str, fee: u64) -> Result<Transaction> {
        let utxos = self.utxos.lock().expect("utxos");
        let coins = utxos.get(&pocket).cloned().unwrap_or_default();
        let needed: u64 = recipients.iter().map(|r| r.amount).sum::<u64>() + fee;
        let mut selected = Vec::new();
        let mut total = 0u64;
        for (out, value, _) in coins {
            selected.push(out);
            total += value;
            if total >= needed {
                break;
            }
        }
        if total < needed {
            return Err(MixerError::Message(format!("pocket {} cannot cover {}", pocket, needed)));
        }
        let mut output: Vec<TxOut> = recipients
            .iter()
            .map(|r| TxOut { value: Amount::from_sat(r.amount), script_pubkey: ScriptBuf::from_bytes(r.address.as_bytes().to_vec()) })
            .collect();
        let change = total - needed;
        if change > 0 {
            output.push(TxOut { value: Amount::from_sat(change), script_pubkey: ScriptBuf::from_bytes(change_address.as_bytes().to_vec()) });
        }
        Ok(Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: selected
                .into_iter()
                .map(|previous_output| TxIn {
                    previous_output,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::default(),
                })
                .collect(),
            output,
        })
    }

    fn sign_my_inputs(&self, inputs: &[TxIn], tx: &Transaction, priv_keys: &[SigningKey]) -> Result<Transaction> {
        if priv_keys.is_empty() {
            return Err(MixerError::SigningFailed("no keys supplied".to_string()));
        }
        let targets: HashSet<OutPoint> = inputs.iter().map(|input| input.previous_output).collect();
        let mut signed = tx.clone();
        for input in &mut signed.input {
            if targets.contains(&input.previous_output) {
                input.script_sig = ScriptBuf::from_bytes(vec![0xE1; 8]);
            }
        }
        Ok(signed)
    }

    async fn broadcast_tx(&self, tx: &Transaction, _task: &MixTask) -> Result<()> {
        self.broadcasts.lock().expect("broadcasts").push(tx.clone());
        Ok(())
    }

    async fn send_fallback(&self, _kind: &str, task: &MixTask) -> Result<()> {
        self.fallbacks.lock().expect("fallbacks").push(task.clone());
        Ok(())
    }

    fn output(&self, outpoint: &str) -> Option<WalletOutput> {
        self.outputs.lock().expect("outputs").get(outpoint).cloned()
    }

    fn confirmed_balance(&self, pocket: u32) -> u64 {
        self.balances.lock().expect("balances").get(&pocket).copied().unwrap_or(0)
    }

    fn wallet_address(&self, address: &str) -> Option<WalletAddress> {
        self.addresses.lock().expect("addresses").get(address).cloned()
    }

    fn change_address(&self, pocket: u32, _label: &str) -> Result<String> {
        Ok(format!("change-{}", pocket))
    }

    fn free_address(&self, pocket: u32, _label: &str) -> Result<String> {
        Ok(format!("dest-{}", pocket))
    }
}

/// Lobby decorator recording everything the coordinator sends.
pub struct SpyLobby {
    inner: MockLobby,
    pub posts: Mutex<Vec<(Option<String>, LobbyMessage)>>,
}

impl SpyLobby {
    pub fn new(inner: MockLobby) -> Self {
        Self { inner, posts: Mutex::new(Vec::new()) }
    }

    fn record(&self, to: Option<&str>, body: &serde_json::Value) {
        if let Ok(message) = serde_json::from_value::<LobbyMessage>(body.clone()) {
            self.posts.lock().expect("posts lock").push((to.map(str::to_string), message));
        }
    }

    pub fn broadcast_count_of(&self, kind: &str) -> usize {
        self.posts
            .lock()
            .expect("posts lock")
            .iter()
            .filter(|(to, message)| to.is_none() && message.kind() == kind)
            .count()
    }

    pub fn unicast_count(&self) -> usize {
        self.posts.lock().expect("posts lock").iter().filter(|(to, _)| to.is_some()).count()
    }
}

#[async_trait]
impl Lobby for SpyLobby {
    fn fingerprint(&self) -> String {
        self.inner.fingerprint()
    }

    async fn open_channel(&self, name: &str) -> Result<()> {
        self.inner.open_channel(name).await
    }

    async fn post_encrypted(&self, channel: &str, body: serde_json::Value) -> Result<()> {
        self.record(None, &body);
        self.inner.post_encrypted(channel, body).await
    }

    async fn post_dh(&self, channel: &str, peer_pub_key: &str, body: serde_json::Value) -> Result<()> {
        self.record(Some(peer_pub_key), &body);
        self.inner.post_dh(channel, peer_pub_key, body).await
    }

    async fn close_channel(&self, name: &str) -> Result<()> {
        self.inner.close_channel(name).await
    }

    async fn subscribe(&self, channel: &str) -> Result<LobbySubscription> {
        self.inner.subscribe(channel).await
    }
}

/// Coordinator plus every collaborator double, wired over one mock hub.
pub struct TestMixer {
    pub coordinator: Coordinator,
    pub events: UnboundedReceiver<MixerEvent>,
    pub hub: Arc<MockHub>,
    pub lobby: Arc<SpyLobby>,
    pub wallet: Arc<MockWallet>,
    pub safe: Arc<MemorySafe>,
    pub store: Arc<RecordingStore>,
    pub gui: Arc<RecordingGui>,
    pub clock: Arc<ManualClock>,
}

impl TestMixer {
    pub fn build(identity: Identity, wallet: Arc<MockWallet>, safe: Arc<MemorySafe>) -> Self {
        let hub = Arc::new(MockHub::new());
        let lobby = Arc::new(SpyLobby::new(MockLobby::new(hub.clone(), MIXER_FINGERPRINT, MIXER_PUB_KEY, true)));
        let store = Arc::new(RecordingStore::new());
        let gui = Arc::new(RecordingGui::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let config = MixerConfig { network: TEST_NETWORK.to_string(), ..MixerConfig::default() };
        let (tx, rx) = event_channel();
        let coordinator = Coordinator::new(
            config,
            lobby.clone() as Arc<dyn Lobby>,
            wallet.clone() as Arc<dyn Wallet>,
            safe.clone() as Arc<dyn mixer_core::infrastructure::safe::Safe>,
            store.clone() as Arc<dyn IdentityStore>,
            identity,
            tx,
        )
        .with_gui(gui.clone() as Arc<dyn GuiBus>)
        .with_clock(clock.clone() as Arc<dyn Clock>);
        Self { coordinator, events: rx, hub, lobby, wallet, safe, store, gui, clock }
    }

    pub fn new(identity: Identity) -> Self {
        Self::build(identity, Arc::new(MockWallet::new()), Arc::new(MemorySafe::new()))
    }

    pub async fn connect(&mut self) {
        self.coordinator.handle_event(MixerEvent::Transport(TransportEvent::Connected)).await;
        self.pump().await;
    }

    pub async fn disconnect(&mut self) {
        self.coordinator.handle_event(MixerEvent::Transport(TransportEvent::Disconnected)).await;
        self.pump().await;
    }

    /// Run queued events to quiescence.
    pub async fn pump(&mut self) {
        loop {
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
            let mut progressed = false;
            while let Ok(event) = self.events.try_recv() {
                self.coordinator.handle_event(event).await;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    /// Advance both the tokio timers and the epoch clock, then settle.
    pub async fn tick(&mut self, secs: u64) {
        tokio::time::advance(std::time::Duration::from_secs(secs)).await;
        self.clock.add(secs);
        self.pump().await;
    }
}

/// A scripted remote participant on the same hub.
pub struct TestPeer {
    pub lobby: MockLobby,
    sub: LobbySubscription,
    pub fingerprint: String,
    pub pub_key: String,
}

impl TestPeer {
    pub async fn join(hub: Arc<MockHub>, name: &str) -> Self {
        Self::join_with_trust(hub, name, true).await
    }

    pub async fn join_with_trust(hub: Arc<MockHub>, name: &str, trusted: bool) -> Self {
        let fingerprint = format!("fp-{}", name);
        let pub_key = format!("02{}", name);
        let lobby = MockLobby::new(hub, fingerprint.clone(), pub_key.clone(), trusted);
        let sub = lobby.subscribe(TEST_CHANNEL).await.expect("peer subscribe");
        Self { lobby, sub, fingerprint, pub_key }
    }

    pub async fn send_broadcast(&self, message: &LobbyMessage) {
        let body = serde_json::to_value(message).expect("encode");
        self.lobby.post_encrypted(TEST_CHANNEL, body).await.expect("broadcast");
    }

    pub async fn send_dh(&self, to: &str, message: &LobbyMessage) {
        let body = serde_json::to_value(message).expect("encode");
        self.lobby.post_dh(TEST_CHANNEL, to, body).await.expect("unicast");
    }

    /// Next frame from another participant, if one is already queued.
    pub async fn recv(&mut self) -> Option<(String, LobbyMessage)> {
        loop {
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
            let event: ChannelEvent = match self.sub.next().now_or_never() {
                Some(Some(event)) => event,
                _ => return None,
            };
            if event.sender == self.fingerprint {
                continue;
            }
            match serde_json::from_value::<LobbyMessage>(event.body) {
                Ok(message) => return Some((event.sender, message)),
                Err(_) => continue,
            }
        }
    }

    /// Drain everything queued and return the messages from others.
    pub async fn drain(&mut self) -> Vec<LobbyMessage> {
        let mut messages = Vec::new();
        while let Some((_, message)) = self.recv().await {
            messages.push(message);
        }
        messages
    }
}
