//! System-wide constants for the CoinJoin mixer.

/// Fixed fee the guest side budgets on top of the announced amount when
/// probing for a pocket able to answer an opening, in satoshis.
pub const GUEST_FEE_SATS: u64 = 50_000;

/// Interval between announcement re-checks (resend / candidate selection),
/// in seconds.
pub const ANNOUNCE_RETRY_SECS: u64 = 10;

/// Default per-task mixing timeout when the task does not carry one,
/// in seconds.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 60;

/// Liveness window divisor: a session past the announce phase is considered
/// stalled when `now - ping > timeout / LIVENESS_DIVISOR`.
pub const LIVENESS_DIVISOR: u64 = 10;

/// Cap on buffered candidate replies while announcing.
///
/// Bounds memory under adversarial reply spam; excess candidates are dropped.
pub const RECEIVED_BUFFER_CAP: usize = 32;

/// Base name of the shared lobby channel. Non-mainnet networks get a
/// `CoinJoin:<network>` suffix.
pub const CHANNEL_BASE_NAME: &str = "CoinJoin";

/// Network name that maps to the unsuffixed channel.
pub const MAINNET_NETWORK: &str = "bitcoin";

/// Task kind under which mixing intents are persisted.
pub const TASK_KIND_MIXER: &str = "mixer";

/// Safe namespace for per-pocket mixing passwords.
pub const SAFE_NS_MIXER: &str = "mixer";

/// Safe namespace for per-transaction host key passwords.
pub const SAFE_NS_SEND: &str = "send";

/// Transaction version prepared clones are normalized to before entering
/// a join.
pub const JOIN_TX_VERSION: i32 = 2;
