//! Application wiring
//!
//! - `logging` - tracing subscriber setup from CLI verbosity and config
//! - `runtime` - builds the store, policy engine, executor, worker and HTTP state from a [`crate::config::Config`]
//! - `error_handling` - fatal error reporting for the binary

pub mod error_handling;
pub mod logging;
pub mod runtime;

pub use error_handling::handle_fatal_error;
pub use logging::init_logging;
pub use runtime::{build_services, Services};
