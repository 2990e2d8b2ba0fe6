use thiserror::Error;

/// Upload-boundary failures, raised synchronously at intake before any
/// session state exists.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("unsupported upload type '{0}' (accepted: png, jpeg, gif, webp)")]
    UnsupportedType(String),
    #[error("could not read upload: {0}")]
    Unreadable(String),
}

/// Failures from the remote generation service as seen at the orchestration
/// boundary. `Unknown` is the catch-all for anything outside the contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("the service returned an invalid style listing: {0}")]
    InvalidResponse(String),
    #[error("the generation service failed: {0}")]
    RemoteFailure(String),
    #[error("the service returned no image: {0}")]
    NoImageReturned(String),
    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl GenerationError {
    /// Stable identifier used in event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::InvalidResponse(_) => "invalid-response",
            GenerationError::RemoteFailure(_) => "remote-failure",
            GenerationError::NoImageReturned(_) => "no-image-returned",
            GenerationError::Unknown(_) => "unknown",
        }
    }
}
