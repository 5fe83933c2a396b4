//! Lobby channel adapter: message framing, channel naming, send paths.

pub mod mock;

use crate::domain::{Delivery, LobbyMessage, PeerInfo};
use crate::foundation::{Result, CHANNEL_BASE_NAME, MAINNET_NETWORK};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Raw inbound record as the lobby transport hands it over; the body is
/// still opaque JSON at this point.
#[derive(Clone, Debug)]
pub struct ChannelEvent {
    pub sender: String,
    pub peer: PeerInfo,
    pub body: serde_json::Value,
}

pub struct LobbySubscription {
    inner: BoxStream<'static, ChannelEvent>,
}

impl LobbySubscription {
    pub fn new(inner: BoxStream<'static, ChannelEvent>) -> Self {
        Self { inner }
    }

    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.inner.next().await
    }
}

/// The encrypted lobby transport. Broadcast posts are channel-encrypted,
/// DH posts are end-to-end encrypted to one peer; both are opaque here.
#[async_trait]
pub trait Lobby: Send + Sync {
    /// Stable identifier of this participant, attached as `sender` to every
    /// delivery so echoes can be filtered.
    fn fingerprint(&self) -> String;

    async fn open_channel(&self, name: &str) -> Result<()>;

    async fn post_encrypted(&self, channel: &str, body: serde_json::Value) -> Result<()>;

    async fn post_dh(&self, channel: &str, peer_pub_key: &str, body: serde_json::Value) -> Result<()>;

    async fn close_channel(&self, name: &str) -> Result<()>;

    async fn subscribe(&self, channel: &str) -> Result<LobbySubscription>;
}

/// Adapter owning the single CoinJoin channel: naming, JSON framing and
/// error reporting. Send failures are logged and swallowed; announcement
/// retries subsume message loss.
pub struct ChannelGateway {
    lobby: Arc<dyn Lobby>,
    channel: String,
}

impl ChannelGateway {
    pub fn new(lobby: Arc<dyn Lobby>, network: &str) -> Self {
        let channel = channel_name(network);
        Self { lobby, channel }
    }

    pub fn fingerprint(&self) -> String {
        self.lobby.fingerprint()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn open(&self) -> Result<LobbySubscription> {
        self.lobby.open_channel(&self.channel).await?;
        debug!(channel = %self.channel, "lobby channel opened");
        self.lobby.subscribe(&self.channel).await
    }

    /// Idempotent teardown; a channel that is already gone is not an error.
    pub async fn close(&self) {
        if let Err(err) = self.lobby.close_channel(&self.channel).await {
            debug!(channel = %self.channel, error = %err, "close_channel reported an error, ignoring");
        }
    }

    pub async fn post_encrypted(&self, message: &LobbyMessage) {
        let body = match serde_json::to_value(message) {
            Ok(body) => body,
            Err(err) => {
                warn!(kind = message.kind(), error = %err, "failed to encode broadcast body");
                return;
            }
        };
        if let Err(err) = self.lobby.post_encrypted(&self.channel, body).await {
            warn!(kind = message.kind(), error = %err, "broadcast post failed");
        }
    }

    pub async fn post_dh(&self, peer_pub_key: &str, message: &LobbyMessage) {
        let body = match serde_json::to_value(message) {
            Ok(body) => body,
            Err(err) => {
                warn!(kind = message.kind(), error = %err, "failed to encode unicast body");
                return;
            }
        };
        if let Err(err) = self.lobby.post_dh(&self.channel, peer_pub_key, body).await {
            warn!(kind = message.kind(), error = %err, "unicast post failed");
        }
    }

    /// Decode a raw channel event into a delivery. Unparseable bodies are
    /// dropped as peer misbehavior.
    pub fn decode(event: ChannelEvent) -> Option<Delivery> {
        match serde_json::from_value::<LobbyMessage>(event.body) {
            Ok(message) => Some(Delivery { sender: event.sender, peer: event.peer, message }),
            Err(err) => {
                debug!(sender = %event.sender, error = %err, "dropping malformed lobby body");
                None
            }
        }
    }
}

/// `CoinJoin` on mainnet, `CoinJoin:<network>` anywhere else.
pub fn channel_name(network: &str) -> String {
    if network == MAINNET_NETWORK {
        CHANNEL_BASE_NAME.to_string()
    } else {
        format!("{}:{}", CHANNEL_BASE_NAME, network)
    }
}
