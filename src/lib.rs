// Library interface for Encore
// This allows integration tests and embedding apps to use Encore's modules

pub mod cli_utils;
pub mod config;
pub mod config_discovery;
pub mod demo;
pub mod error;
pub mod eviction;
pub mod fingerprint;
pub mod logging;
pub mod memo;
pub mod rerun;
pub mod session;

// Re-export commonly used types
pub use config::EncoreConfig;
pub use config_discovery::{discover_config, load_config_with_discovery};
pub use error::{EncoreError, Result};
pub use eviction::{EvictionConfig, EvictionPolicyType};
pub use fingerprint::{Args, Fingerprint, FunctionIdentity};
pub use memo::{CachePolicy, CacheStats, Cached, MemoCache};
pub use rerun::{
    register_script, InteractionEvent, RerunDriver, RunStatus, ScriptContext, ScriptHandle,
    UiDescription, UiElement, Widget, WidgetKind,
};
pub use session::{RunState, Session, SessionId, SessionRegistry, SessionStore};
