use crate::envelope::Envelope;
use prost::Message;
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest over the canonical form of a decoded envelope.
///
/// The canonical form is the protobuf encoding of the packet (fields in tag
/// order), the length-prefixed channel and gateway ids, and the encoding of
/// the decrypted payload when one was attached. Topic and receipt time are
/// not part of it, so the same wire message delivered twice hashes the same.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(envelope: &Envelope) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(envelope.packet().encode_to_vec());
        update_str(&mut hasher, envelope.channel_id());
        update_str(&mut hasher, envelope.gateway_id());

        match envelope.decrypted() {
            Some(data) => {
                hasher.update([1u8]);
                hasher.update(data.encode_to_vec());
            }
            None => hasher.update([0u8]),
        }

        Fingerprint(hasher.finalize().into())
    }
}

impl From<[u8; 32]> for Fingerprint {
    fn from(bytes: [u8; 32]) -> Self {
        Fingerprint(bytes)
    }
}

fn update_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}
