use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("chain rpc error: {0}")]
    Rpc(#[from] alloy_transport::TransportError),

    #[error("store http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("sender recovery error: {0}")]
    Recovery(#[from] alloy_consensus::crypto::RecoveryError),

    #[error("{0}")]
    Custom(String),
}

pub type Result<T> = std::result::Result<T, Error>;
