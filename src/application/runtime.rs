//! The single logical executor: every callback the mixer reacts to is an
//! event on one queue, processed serially by the coordinator. No handler
//! observes another handler's intermediate state.

use crate::application::coordinator::Coordinator;
use crate::domain::Delivery;
use crate::foundation::SessionId;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::info;

/// Transport lifecycle notifications from the hosting application.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnect,
    Disconnected,
}

#[derive(Debug)]
pub enum MixerEvent {
    Transport(TransportEvent),
    Lobby(Delivery),
    RetryTick(SessionId),
}

pub fn event_channel() -> (UnboundedSender<MixerEvent>, UnboundedReceiver<MixerEvent>) {
    mpsc::unbounded_channel()
}

/// Drive the coordinator until the event channel closes. Handlers are
/// total; nothing here can abort the loop.
pub async fn run_mixer_loop(mut coordinator: Coordinator, mut events: UnboundedReceiver<MixerEvent>) {
    info!(channel = coordinator.channel_name(), "mixer loop started");
    while let Some(event) = events.recv().await {
        coordinator.handle_event(event).await;
    }
    info!("mixer loop stopped");
}
