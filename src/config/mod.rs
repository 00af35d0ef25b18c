mod loader;
mod schema;

pub use loader::{default_config_path, load_config};
pub use schema::{
    AgentConfig, ApprovalMode, Config, ProviderConfig, SandboxPolicyConfig, default_code_extensions,
};
