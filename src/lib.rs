pub mod cache;
pub mod command;
pub mod config;
pub mod container;
pub mod converter;
pub mod error;
pub mod interceptor;
pub mod invocation;
pub mod logging;
pub mod persistence;
pub mod topology;
pub mod view;

pub use cache::{Cache, CacheManager};
pub use command::{Command, Flag, Flags, Metadata, Value, Version};
pub use config::{CacheConfig, CacheManagerConfig};
pub use container::{CacheEntry, DataContainer};
pub use error::{CacheError, Result};
pub use interceptor::{CommandExecutor, Interceptor, InterceptorChain};
pub use invocation::{CommandResult, InvocationContext, InvocationStage};
pub use view::LazyView;
