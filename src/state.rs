//! Server context module
//!
//! The context object constructed once at startup and handed by reference to
//! every component that needs it: connections, tasks, and the tick pump all
//! reach the world, the engine, and the collaborators through here rather
//! than through globals.

use std::sync::Arc;

use crate::auth::AuthService;
use crate::config::ServerConfig;
use crate::engine::GameEngine;
use crate::error::Result;
use crate::game::world::GameWorld;
use crate::net::session::SessionRegistry;

/// Shared server state
pub struct ServerContext {
    /// Server configuration
    pub config: ServerConfig,
    /// The task engine driving all game-state mutation
    pub engine: GameEngine,
    /// The game world: entities, regions, tick counter
    pub world: GameWorld,
    /// Registry of live connections
    pub sessions: SessionRegistry,
    /// Account checking and player persistence
    pub auth: AuthService,
}

impl ServerContext {
    /// Build the context. The engine is created cold; call
    /// [`ServerContext::start_engine`] once the `Arc` exists.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>> {
        let world = GameWorld::new(&config)?;
        let auth = AuthService::new(config.dev_mode, config.save_path());

        Ok(Arc::new(Self {
            engine: GameEngine::new(),
            world,
            sessions: SessionRegistry::new(),
            auth,
            config,
        }))
    }

    /// Spawn the engine's dispatcher and background threads
    pub fn start_engine(self: &Arc<Self>) {
        self.engine.start(self.clone());
    }
}
