pub mod error;
pub mod future;
pub mod native;
pub mod promise;
pub mod realm;
pub mod reflect;
pub mod runtime;
pub mod value;
pub mod weak;

use boa_engine::{Context, JsResult};
pub use error::{Error, Result};

/// A generic runtime API
pub trait Api {
    /// Initialize a runtime API in the realm `context` has entered.
    fn init(self, context: &mut Context) -> JsResult<()>;
}

pub use realm::Realm;
pub use runtime::{Clock, ManualClock, Runtime, SystemClock, Timers};
pub use weak::WeakTable;
