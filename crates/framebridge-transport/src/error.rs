/// Errors that can occur when talking to the browser environment.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The origin string could not be parsed or is not a tuple origin.
    #[error("invalid origin '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: String },

    /// The hidden session frame could not be inserted into the document.
    #[error("failed to create frame '{name}': {reason}")]
    FrameCreation { name: String, reason: String },

    /// The target window has been closed or navigated away.
    #[error("window '{0}' is no longer reachable")]
    WindowClosed(String),

    /// A shared storage operation failed (quota, disabled storage).
    #[error("shared storage error on key '{key}': {reason}")]
    Storage { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, TransportError>;
