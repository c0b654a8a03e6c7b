use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("unreadable path while resolving pattern: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("--nreduce must be at least 1")]
    NoReducers,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rpc failed: {0}")]
    Rpc(#[from] tarpc::client::RpcError),

    #[error("bad intermediate record: {0}")]
    Record(#[from] serde_json::Error),
}
