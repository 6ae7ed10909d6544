use crate::keys::{ChannelKey, KeyError};
use crate::proto::{Data, PortNum};
use prost::Message;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DecryptError {
    #[error("packet has no encrypted body")]
    Empty,
    #[error("none of the {attempts} configured keys produced a valid payload")]
    Undecryptable { attempts: usize },
}

/// Builds the 128-bit AES-CTR nonce for a packet: little-endian packet id
/// widened to 64 bits, then the sender node number, then a zero block
/// counter.
pub fn nonce(packet_id: u64, from: u32) -> [u8; 16] {
    let mut nonce = [0u8; 16];
    nonce[0..8].copy_from_slice(&packet_id.to_le_bytes());
    nonce[8..12].copy_from_slice(&from.to_le_bytes());
    nonce[12..16].copy_from_slice(&0u32.to_le_bytes());
    nonce
}

/// Recovers packet payloads using the configured channel keys.
///
/// Keys are tried in configured order and the first one whose output parses
/// as a `Data` message with a known port number wins. A successful cipher
/// operation alone says nothing: any key "decrypts" any ciphertext.
#[derive(Clone, Debug, Default)]
pub struct Decryptor {
    keys: Vec<ChannelKey>,
}

impl Decryptor {
    pub fn new(keys: Vec<ChannelKey>) -> Self {
        Decryptor { keys }
    }

    pub fn from_base64<I, S>(keys: I) -> Result<Self, KeyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = keys
            .into_iter()
            .map(|k| k.as_ref().parse())
            .collect::<Result<Vec<ChannelKey>, _>>()?;
        Ok(Decryptor { keys })
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn decrypt(&self, encrypted: &[u8], packet_id: u64, from: u32) -> Result<Data, DecryptError> {
        if encrypted.is_empty() {
            return Err(DecryptError::Empty);
        }

        let nonce = nonce(packet_id, from);

        for (index, key) in self.keys.iter().enumerate() {
            let mut buf = encrypted.to_vec();
            if let Err(e) = key.apply_keystream(&nonce, &mut buf) {
                tracing::debug!(packet_id, key = index, "cipher error: {e}");
                continue;
            }

            match parse_payload(&buf) {
                Some(data) => return Ok(data),
                None => tracing::trace!(packet_id, key = index, "key did not yield a valid payload"),
            }
        }

        Err(DecryptError::Undecryptable {
            attempts: self.keys.len(),
        })
    }
}

fn parse_payload(buf: &[u8]) -> Option<Data> {
    let data = Data::decode(buf).ok()?;
    match PortNum::try_from(data.portnum) {
        Ok(PortNum::UnknownApp) | Err(_) => None,
        Ok(_) => Some(data),
    }
}
