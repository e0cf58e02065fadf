//! # Recon Node
//!
//! Standalone process hosting the command gateway.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (TOML file, then `RECON_*` environment overrides)
//! 2. Open the user directory and the offline queue
//! 3. Start the execution host (console plus partition owner threads)
//! 4. Start the gateway and bring resident actors online
//! 5. Run until Ctrl-C, then stop serving and persist the queue

pub mod config;
pub mod dispatcher;
pub mod runtime;

pub use config::{HostConfig, NodeConfig};
pub use dispatcher::BuiltinDispatcher;
pub use runtime::NodeRuntime;
