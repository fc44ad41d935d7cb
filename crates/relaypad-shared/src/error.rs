use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),

    #[error("Invalid topic name: {0}")]
    InvalidTopic(String),

    #[error("Key file error: {0}")]
    KeyFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
