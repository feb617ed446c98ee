use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("line too long: {0} bytes")]
    LineTooLong(usize),
    #[error("line contains an embedded newline")]
    EmbeddedNewline,
    #[error("empty line")]
    Empty,
    #[error("invalid party code: {0:?}")]
    InvalidPartyCode(String),
    #[error("unexpected reply: {0:?}")]
    UnexpectedReply(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
