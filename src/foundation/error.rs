use std::io;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    TransportError,
    EncodingError,
    SerializationError,
    CryptoError,
    SigningFailed,
    MissingOutput,
    UnsupportedAddressType,
    PocketMismatch,
    PasswordUnavailable,
    InvalidDerivationPath,
    InvalidStateTransition,
    ProtocolViolation,
    ConfigError,
    ParseError,
    Message,
}

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum MixerError {
    #[error("transport error during {operation}: {details}")]
    TransportError { operation: String, details: String },

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("{format} serialization error: {details}")]
    SerializationError { format: String, details: String },

    #[error("crypto error during {operation}: {details}")]
    CryptoError { operation: String, details: String },

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("prior output not found: {outpoint}")]
    MissingOutput { outpoint: String },

    #[error("unsupported address type for {address}")]
    UnsupportedAddressType { address: String },

    #[error("input belongs to pocket {actual}, expected {expected}")]
    PocketMismatch { expected: u32, actual: u32 },

    #[error("no password in safe for {namespace}:{key}")]
    PasswordUnavailable { namespace: String, key: String },

    #[error("invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    #[error("invalid session state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("{0}")]
    Message(String),
}

pub type Result<T> = std::result::Result<T, MixerError>;

impl MixerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MixerError::TransportError { .. } => ErrorCode::TransportError,
            MixerError::EncodingError(_) => ErrorCode::EncodingError,
            MixerError::SerializationError { .. } => ErrorCode::SerializationError,
            MixerError::CryptoError { .. } => ErrorCode::CryptoError,
            MixerError::SigningFailed(_) => ErrorCode::SigningFailed,
            MixerError::MissingOutput { .. } => ErrorCode::MissingOutput,
            MixerError::UnsupportedAddressType { .. } => ErrorCode::UnsupportedAddressType,
            MixerError::PocketMismatch { .. } => ErrorCode::PocketMismatch,
            MixerError::PasswordUnavailable { .. } => ErrorCode::PasswordUnavailable,
            MixerError::InvalidDerivationPath(_) => ErrorCode::InvalidDerivationPath,
            MixerError::InvalidStateTransition { .. } => ErrorCode::InvalidStateTransition,
            MixerError::ProtocolViolation(_) => ErrorCode::ProtocolViolation,
            MixerError::ConfigError(_) => ErrorCode::ConfigError,
            MixerError::ParseError(_) => ErrorCode::ParseError,
            MixerError::Message(_) => ErrorCode::Message,
        }
    }

    pub fn context(&self) -> ErrorContext {
        ErrorContext { code: self.code(), message: self.to_string() }
    }

    pub fn transport(operation: impl Into<String>, details: impl std::fmt::Display) -> Self {
        MixerError::TransportError { operation: operation.into(), details: details.to_string() }
    }

    pub fn crypto(operation: impl Into<String>, details: impl std::fmt::Display) -> Self {
        MixerError::CryptoError { operation: operation.into(), details: details.to_string() }
    }

    /// Signing errors are fatal to their session, never to the service.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::SigningFailed
                | ErrorCode::MissingOutput
                | ErrorCode::UnsupportedAddressType
                | ErrorCode::PocketMismatch
                | ErrorCode::PasswordUnavailable
                | ErrorCode::InvalidDerivationPath
        )
    }
}

impl From<hex::FromHexError> for MixerError {
    fn from(err: hex::FromHexError) -> Self {
        MixerError::EncodingError(format!("hex decode error: {}", err))
    }
}

impl From<serde_json::Error> for MixerError {
    fn from(err: serde_json::Error) -> Self {
        MixerError::SerializationError { format: "json".to_string(), details: err.to_string() }
    }
}

impl From<toml::de::Error> for MixerError {
    fn from(err: toml::de::Error) -> Self {
        MixerError::ConfigError(format!("TOML parsing error: {}", err))
    }
}

impl From<io::Error> for MixerError {
    fn from(err: io::Error) -> Self {
        MixerError::TransportError { operation: "io".to_string(), details: err.to_string() }
    }
}

impl From<bitcoin::consensus::encode::Error> for MixerError {
    fn from(err: bitcoin::consensus::encode::Error) -> Self {
        MixerError::EncodingError(format!("tx decode error: {}", err))
    }
}

impl From<bitcoin::secp256k1::Error> for MixerError {
    fn from(err: bitcoin::secp256k1::Error) -> Self {
        MixerError::CryptoError { operation: "secp256k1".to_string(), details: err.to_string() }
    }
}

impl From<bitcoin::bip32::Error> for MixerError {
    fn from(err: bitcoin::bip32::Error) -> Self {
        MixerError::InvalidDerivationPath(err.to_string())
    }
}

// NOTE: Avoid adding generic "stringly" error conversions here.
// Use structured `MixerError` variants at the call site to preserve context.
