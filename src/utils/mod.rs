pub mod errors;
pub mod logging;

pub use errors::{BusError, ConfigError, NavigationError, ViewStateError};
pub use logging::{init_tracing, init_tracing_with};
