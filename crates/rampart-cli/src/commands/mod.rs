pub mod exec;
pub mod serve;
pub mod validate;

/// Server name advertised to MCP clients.
pub const SERVER_NAME: &str = "rampart";

/// Version advertised to MCP clients.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
