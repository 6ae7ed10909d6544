use thiserror::Error;

/// Errors raised while turning a transport message into an envelope
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("could not decode service envelope: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("service envelope has no packet")]
    MissingPacket,
}
