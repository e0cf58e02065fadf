//! Request guards that run before a command reaches the bridge.
//!
//! Order inside the handler: ClientIp → RateLimit → AllowList → Replay.

pub mod ip_filter;
pub mod rate_limit;
pub mod replay;

pub use ip_filter::{resolve_client_ip, AllowList, ClientIp, ClientIpLayer};
pub use rate_limit::RateLimitState;
pub use replay::ReplayGuard;
