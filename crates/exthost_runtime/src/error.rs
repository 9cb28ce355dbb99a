use boa_engine::{JsError, JsNativeError};
use derive_more::{Display, Error, From};

use crate::rpc::RpcError;

#[derive(Display, Debug, Error, From)]
pub enum Error {
    CoreError {
        source: exthost_core::Error,
    },
    TransformError {
        source: exthost_transform::TransformError,
    },
    RpcError {
        source: RpcError,
    },
    ConfigError {
        source: figment::Error,
    },
    InvalidUrl {
        source: url::ParseError,
    },
    InvalidManifest {
        source: serde_json::Error,
    },
    #[display(fmt = "resource not found: {path}")]
    #[from(ignore)]
    ResourceNotFound {
        path: String,
    },
    /// The page is not a place where the requested environment may run.
    #[display(fmt = "{message}")]
    #[from(ignore)]
    InvalidEnvironment {
        message: String,
    },
    /// An internal message from the host that lacks what it needs.
    #[display(fmt = "malformed internal message: {message}")]
    #[from(ignore)]
    MalformedMessage {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<JsError> for Error {
    fn from(source: JsError) -> Self {
        Error::CoreError {
            source: source.into(),
        }
    }
}

impl From<Error> for JsError {
    fn from(value: Error) -> Self {
        match value {
            Error::CoreError { source } => source.into(),
            Error::TransformError { source } => JsNativeError::syntax()
                .with_message(source.to_string())
                .into(),
            Error::RpcError { source } => JsNativeError::error()
                .with_message(source.to_string())
                .into(),
            Error::ConfigError { source } => JsNativeError::error()
                .with_message(source.to_string())
                .into(),
            Error::InvalidUrl { source } => JsNativeError::syntax()
                .with_message(format!("Invalid URL: {source}"))
                .into(),
            Error::InvalidManifest { source } => JsNativeError::typ()
                .with_message(format!("Invalid manifest: {source}"))
                .into(),
            Error::ResourceNotFound { path } => JsNativeError::typ()
                .with_message(format!("Failed to fetch {path}"))
                .into(),
            Error::InvalidEnvironment { message } => {
                JsNativeError::typ().with_message(message).into()
            }
            Error::MalformedMessage { message } => JsNativeError::typ()
                .with_message(format!("malformed internal message: {message}"))
                .into(),
        }
    }
}
