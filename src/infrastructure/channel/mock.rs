//! In-process lobby used by the integration tests: a broadcast hub per
//! channel name, with DH posts filtered down to their addressee. Broadcast
//! posts are echoed back to the sender, matching the real lobby.

use crate::domain::PeerInfo;
use crate::foundation::{MixerError, Result};
use crate::infrastructure::channel::{ChannelEvent, Lobby, LobbySubscription};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, Mutex};

#[derive(Clone, Debug)]
struct MockFrame {
    /// DH addressee; `None` for channel-encrypted broadcasts.
    to: Option<String>,
    event: ChannelEvent,
}

pub struct MockHub {
    channels: Mutex<HashMap<String, broadcast::Sender<MockFrame>>>,
}

impl MockHub {
    pub fn new() -> Self {
        Self { channels: Mutex::new(HashMap::new()) }
    }

    async fn channel(&self, name: &str) -> broadcast::Sender<MockFrame> {
        let mut guard = self.channels.lock().await;
        guard.entry(name.to_string()).or_insert_with(|| broadcast::channel(256).0).clone()
    }
}

impl Default for MockHub {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MockLobby {
    hub: std::sync::Arc<MockHub>,
    fingerprint: String,
    pub_key: String,
    trusted: bool,
}

impl MockLobby {
    pub fn new(hub: std::sync::Arc<MockHub>, fingerprint: impl Into<String>, pub_key: impl Into<String>, trusted: bool) -> Self {
        Self { hub, fingerprint: fingerprint.into(), pub_key: pub_key.into(), trusted }
    }

    pub fn pub_key(&self) -> &str {
        &self.pub_key
    }

    async fn publish(&self, channel: &str, to: Option<String>, body: serde_json::Value) -> Result<()> {
        let frame = MockFrame {
            to,
            event: ChannelEvent {
                sender: self.fingerprint.clone(),
                peer: PeerInfo { pub_key: self.pub_key.clone(), trusted: self.trusted },
                body,
            },
        };
        let sender = self.hub.channel(channel).await;
        sender.send(frame).map_err(|err| MixerError::transport("mock publish", err))?;
        Ok(())
    }
}

#[async_trait]
impl Lobby for MockLobby {
    fn fingerprint(&self) -> String {
        self.fingerprint.clone()
    }

    async fn open_channel(&self, name: &str) -> Result<()> {
        self.hub.channel(name).await;
        Ok(())
    }

    async fn post_encrypted(&self, channel: &str, body: serde_json::Value) -> Result<()> {
        self.publish(channel, None, body).await
    }

    async fn post_dh(&self, channel: &str, peer_pub_key: &str, body: serde_json::Value) -> Result<()> {
        self.publish(channel, Some(peer_pub_key.to_string()), body).await
    }

    async fn close_channel(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<LobbySubscription> {
        let sender = self.hub.channel(channel).await;
        let mut receiver = sender.subscribe();
        let own_pub_key = self.pub_key.clone();
        let stream = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(frame) => {
                        match &frame.to {
                            Some(addressee) if *addressee != own_pub_key => continue,
                            _ => yield frame.event,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        };
        Ok(LobbySubscription::new(Box::pin(stream)))
    }
}
