use thiserror::Error;

pub type Result<T> = std::result::Result<T, DnsListError>;

#[derive(Error, Debug)]
pub enum DnsListError {
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("invalid query name: {0}")]
    InvalidName(String),

    #[error("malformed DNS response: {0}")]
    Malformed(String),

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
