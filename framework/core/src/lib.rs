mod bail;
mod error;
mod shutdown;

pub mod prelude {
    pub use crate::bail::UserBailError;
    pub use crate::error::RuntimeError;
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle};
}
