use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlangateError {
    /// Malformed lock identity inputs, rejected before any store I/O.
    #[error("Invalid lock identity: {0}")]
    InvalidIdentity(String),

    /// The backing store could not be reached or refused the operation.
    /// Callers may retry the whole operation; nothing is retried here.
    #[error("Lock store unavailable: {details}")]
    StoreUnavailable { details: String },

    /// A persisted record failed to decode. Names the offending key so an
    /// operator can inspect or remove it.
    #[error("Corrupt lock record at key '{key}': {details}")]
    CorruptRecord { key: String, details: String },

    #[error("Configuration file error: {0}")]
    ConfigFile(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, PlangateError>;
