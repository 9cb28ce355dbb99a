use boa_engine::{JsError, JsNativeError};
use derive_more::{Display, Error, From};

/// Errors raised while the host drives the engine.
#[derive(Display, Debug, Error, From)]
pub enum Error {
    /// An exception thrown by JavaScript code (or by a native function).
    JsError { source: JsError },
    /// The event loop ran dry while a promise was still pending.
    #[display(fmt = "promise never settled: {description}")]
    Unsettled {
        description: String,
    },
    /// A realm or host-defined slot was used before it was initialized.
    #[display(fmt = "host state missing: {name}")]
    MissingHostState {
        name: &'static str,
    },
}

impl From<Error> for JsError {
    fn from(value: Error) -> Self {
        match value {
            Error::JsError { source } => source,
            Error::Unsettled { description } => JsNativeError::error()
                .with_message(format!("promise never settled: {description}"))
                .into(),
            Error::MissingHostState { name } => JsNativeError::typ()
                .with_message(format!("host state missing: {name}"))
                .into(),
        }
    }
}

impl From<JsNativeError> for Error {
    fn from(source: JsNativeError) -> Self {
        Error::JsError {
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
