//! Reference implementations of the outbound ports.

pub mod capture;
pub mod directory;
pub mod local_host;
pub mod queue;

pub use capture::CaptureRegistry;
pub use directory::{CachedUserDirectory, JsonFileStorage, MemoryStorage, UserStorage};
pub use local_host::{
    ActorProfile, ActorSnapshot, CommandDispatcher, CommandSender, DeferredOutput,
    LocalExecutionHost,
};
pub use queue::OfflineQueueStore;
