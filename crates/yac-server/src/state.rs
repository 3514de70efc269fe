//! Process-wide shared state (§6.1), grounded on
//! `agenticlaw-gateway/src/server.rs`'s `ExtendedConfig`/`AppState` pattern:
//! one `GitRepo` gate, one token verifier, and the plugin registries built
//! once and reused for every request.

use yac_action::ActionPlugin;
use yac_core::config::Config;
use yac_plugin::Registry;
use yac_repo::gate::GitRepo;

use crate::auth::Verifier;
use crate::log::LogPlugin;

pub struct AppState {
    pub config: Config,
    pub repo: GitRepo,
    pub verifier: Box<dyn Verifier>,
    pub actions: Registry<dyn ActionPlugin>,
    pub logs: Registry<dyn LogPlugin>,
}

impl AppState {
    pub fn new(config: Config, repo: GitRepo, verifier: Box<dyn Verifier>) -> yac_core::error::Result<Self> {
        let actions = yac_action::registry()?;
        let logs = crate::log::registry();
        Ok(Self { config, repo, verifier, actions, logs })
    }
}
