use std::fmt;

/// A failure caused by how the tool was invoked, reported without the
/// "this is a bug" footer.
#[derive(Debug)]
pub struct UserError {
    pub message: String,
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UserError {}

pub type Error = anyhow::Error;

pub fn print(err: &Error) {
    if let Some(user_error) = err.downcast_ref::<UserError>() {
        eprintln!("[ERROR] {}", user_error);
    } else {
        eprintln!(
            "[ERROR] {:#}\n\nIf you think this is a bug then please open an issue.",
            err
        );
    }
}

pub type Result<T> = std::result::Result<T, Error>;

macro_rules! user_error {
    ($msg:literal $(,)?) => {
        anyhow::anyhow!($crate::error::UserError {
            message: format!($msg),
        })
    };
    ($fmt:expr, $($arg:tt)*) => {
        anyhow::anyhow!($crate::error::UserError {
            message: format!($fmt, $($arg)*)
        })
    };
}

macro_rules! bail_user_error {
    ($msg:literal $(,)?) => {
        return Err($crate::error::user_error!($msg))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::error::user_error!($fmt, $($arg)*))
    };
}

pub(crate) use {bail_user_error, user_error};
