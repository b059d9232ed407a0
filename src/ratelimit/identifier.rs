//! Identifier resolution for callers that have not named themselves yet.
//!
//! The fingerprint is derived from low-entropy signals and is trivially
//! spoofed. It is not a security boundary; it only keeps fully anonymous
//! callers from sharing one global bucket.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Bytes of the signal digest kept in a fingerprint.
const FINGERPRINT_BYTES: usize = 16;

/// Environment signals available for fingerprinting a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSignals {
    /// Raw `User-Agent` string
    pub user_agent: String,
    /// Preferred language tag, e.g. `en-US`
    pub accept_language: String,
    /// IANA timezone name, e.g. `Europe/Berlin`
    pub timezone: String,
    /// Operating system or platform name
    pub platform: String,
    /// Screen geometry, e.g. `1920x1080x24`
    pub screen: String,
    /// Peer address as seen by the server
    pub remote_addr: String,
}

impl ClientSignals {
    fn parts(&self) -> [&str; 6] {
        [
            self.user_agent.as_str(),
            self.accept_language.as_str(),
            self.timezone.as_str(),
            self.platform.as_str(),
            self.screen.as_str(),
            self.remote_addr.as_str(),
        ]
    }

    /// Whether no signal carries any content.
    pub fn is_empty(&self) -> bool {
        self.parts().iter().all(|part| part.trim().is_empty())
    }
}

/// Resolves the identifier an attempt is counted under.
#[derive(Debug, Clone)]
pub struct ClientIdentifier {
    installation_id: String,
}

impl ClientIdentifier {
    /// Create a resolver with a fresh installation id.
    pub fn new() -> Self {
        Self::with_installation_id(&Uuid::new_v4().simple().to_string())
    }

    /// Create a resolver with a fixed installation id.
    pub fn with_installation_id(installation_id: &str) -> Self {
        Self {
            installation_id: installation_id.to_string(),
        }
    }

    /// The identifier to count attempts under.
    ///
    /// A non-blank explicit identifier always wins and is normalized so that
    /// `User@X.com ` and `user@x.com` share a key.
    pub fn resolve(&self, explicit: Option<&str>, signals: &ClientSignals) -> String {
        if let Some(explicit) = explicit.map(str::trim).filter(|s| !s.is_empty()) {
            return explicit.to_lowercase();
        }
        self.fingerprint(signals)
    }

    /// Fingerprint derived from `signals` alone.
    pub fn fingerprint(&self, signals: &ClientSignals) -> String {
        if signals.is_empty() {
            return format!("client_{}", self.installation_id);
        }

        let mut hasher = Sha256::new();
        for part in signals.parts() {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        format!("client_{}", hex::encode(&digest[..FINGERPRINT_BYTES]))
    }
}

impl Default for ClientIdentifier {
    fn default() -> Self {
        Self::new()
    }
}
