use crate::foundation::util::encoding::parse_hex_fixed;
use crate::foundation::MixerError;
use bitcoin::hashes::{sha256, Hash};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Session identifier: 16 random bytes, always displayed as 32 lowercase
/// hex characters. Generated by hashing fresh CSPRNG output with SHA-256
/// and keeping the first half of the digest.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct SessionId([u8; 16]);

impl SessionId {
    pub const fn new(value: [u8; 16]) -> Self {
        Self(value)
    }

    pub fn generate<R: RngCore>(rng: &mut R) -> Self {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        let digest = sha256::Hash::hash(&seed);
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest.as_byte_array()[..16]);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for SessionId {
    type Err = MixerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(parse_hex_fixed::<16>(s)?))
    }
}

impl Serialize for SessionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = <[u8; 16]>::deserialize(deserializer)?;
            Ok(Self(bytes))
        }
    }
}

impl From<[u8; 16]> for SessionId {
    fn from(value: [u8; 16]) -> Self {
        Self(value)
    }
}

/// Public key of a lobby peer, as delivered by the channel callbacks.
pub type PeerPubKey = String;
