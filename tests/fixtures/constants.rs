#![allow(dead_code)]

pub const TEST_NETWORK: &str = "testnet";
pub const TEST_CHANNEL: &str = "CoinJoin:testnet";
pub const TEST_PASSWORD: &str = "correct horse battery staple";
pub const TEST_GUEST_FEE: u64 = 50_000;

pub const MIXER_FINGERPRINT: &str = "fp-mixer";
pub const MIXER_PUB_KEY: &str = "02mixer";
