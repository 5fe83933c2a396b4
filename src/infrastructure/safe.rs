//! Password safe collaborator: an in-memory, time-limited store the mixer
//! only ever reads. An empty answer means the security context expired.

use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Mutex;

pub trait Safe: Send + Sync {
    /// Fetch the password stored under `(namespace, key)`, if it is still
    /// live. May return `None` at any time.
    fn get(&self, namespace: &str, key: &str) -> Option<SecretString>;
}

/// Plain in-memory safe; the hosting application decides expiry by removing
/// entries.
pub struct MemorySafe {
    entries: Mutex<HashMap<(String, String), SecretString>>,
}

impl MemorySafe {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    pub fn put(&self, namespace: &str, key: &str, password: SecretString) {
        self.entries.lock().expect("safe lock").insert((namespace.to_string(), key.to_string()), password);
    }

    pub fn remove(&self, namespace: &str, key: &str) {
        self.entries.lock().expect("safe lock").remove(&(namespace.to_string(), key.to_string()));
    }
}

impl Default for MemorySafe {
    fn default() -> Self {
        Self::new()
    }
}

impl Safe for MemorySafe {
    fn get(&self, namespace: &str, key: &str) -> Option<SecretString> {
        self.entries.lock().expect("safe lock").get(&(namespace.to_string(), key.to_string())).cloned()
    }
}

/// Key under which a pocket's mixing password lives.
pub fn pocket_key(pocket: u32) -> String {
    format!("pocket:{}", pocket)
}
