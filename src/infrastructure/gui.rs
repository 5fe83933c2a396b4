//! GUI event bus seam. The mixer never prompts; it only reports state.

/// State string posted while re-announcing.
pub const GUI_ANNOUNCING: &str = "Announcing";

/// State string posted when the timeout fallback fires.
pub const GUI_SENDING_NO_MIXING: &str = "Sending with no mixing";

pub trait GuiBus: Send + Sync {
    /// Post a mixer state update (`"Announcing"`, `"Sending with no
    /// mixing"`, or a session state name).
    fn post_mixer_state(&self, state: &str);
}

pub struct NoopGui;

impl GuiBus for NoopGui {
    fn post_mixer_state(&self, _state: &str) {}
}
