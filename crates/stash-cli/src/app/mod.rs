//! Application context and store opening for the CLI.

mod context;
mod passphrase;
mod resolver;

pub use context::AppContext;
pub use resolver::resolve_config_path;
