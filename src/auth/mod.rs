//! Authentication and player persistence
//!
//! The collaborator invoked by the handshake's final step and by
//! session-close handling. `check_login` never returns an error: every
//! failure, including I/O trouble underneath, is folded into a numeric
//! reject code the protocol layer writes back to the client. Profile saves
//! and loads are blocking flat-file operations and therefore only ever run
//! on the engine's background lane.

use std::fs;
use std::path::PathBuf;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AuthError, Result, RunevaleError};
use crate::game::location::Location;
use crate::game::player::{Appearance, Player, PlayerRights};
use crate::protocol::login::{validate_password, validate_username, LoginResponse};

/// A registered account
#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    password: String,
    pub rights: PlayerRights,
    pub enabled: bool,
}

/// The persisted slice of a player, stored one JSON file per account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub username: String,
    pub rights: PlayerRights,
    pub location: Location,
    pub appearance: Appearance,
}

impl PlayerProfile {
    /// A fresh profile at the spawn point
    pub fn fresh(username: &str) -> Self {
        Self {
            username: username.to_string(),
            rights: PlayerRights::Normal,
            location: Location::default_spawn(),
            appearance: Appearance::default(),
        }
    }
}

/// Outcome of a login check, delivered as data
#[derive(Debug)]
pub enum LoginOutcome {
    /// Credentials accepted; the profile to build the player from
    Accepted(PlayerProfile),
    /// Credentials rejected with the code to write back
    Rejected(LoginResponse),
}

/// Account checking and flat-file persistence
pub struct AuthService {
    /// Accept any credentials and grant admin rights
    dev_mode: bool,
    accounts: DashMap<String, Account>,
    save_dir: PathBuf,
}

impl AuthService {
    /// Create the service. The save directory is created lazily on first
    /// write, so construction never touches the filesystem.
    pub fn new(dev_mode: bool, save_dir: PathBuf) -> Self {
        if dev_mode {
            info!("Auth service running in DEVELOPMENT mode - all logins accepted");
        }
        Self {
            dev_mode,
            accounts: DashMap::new(),
            save_dir,
        }
    }

    /// Register a new account
    pub fn register(&self, username: &str, password: &str) -> Result<()> {
        let username = validate_username(username)?;
        validate_password(password)?;

        if self.accounts.contains_key(&username) {
            return Err(RunevaleError::Auth(AuthError::RegistrationFailed(
                "username taken".to_string(),
            )));
        }

        self.accounts.insert(
            username.clone(),
            Account {
                username,
                password: password.to_string(),
                rights: PlayerRights::Normal,
                enabled: true,
            },
        );
        Ok(())
    }

    /// Enable or disable an account
    pub fn set_enabled(&self, username: &str, enabled: bool) {
        if let Some(mut account) = self.accounts.get_mut(username) {
            account.enabled = enabled;
        }
    }

    /// Check credentials and load the player's profile.
    ///
    /// Blocking (reads the profile file); run on the background lane.
    pub fn check_login(&self, username: &str, password: &str) -> LoginOutcome {
        let username = match validate_username(username) {
            Ok(u) => u,
            Err(_) => return LoginOutcome::Rejected(LoginResponse::InvalidCredentials),
        };
        if validate_password(password).is_err() {
            return LoginOutcome::Rejected(LoginResponse::InvalidCredentials);
        }

        let rights = if self.dev_mode {
            PlayerRights::Administrator
        } else {
            match self.accounts.get(&username) {
                Some(account) if !account.enabled => {
                    return LoginOutcome::Rejected(LoginResponse::AccountDisabled);
                }
                Some(account) if account.password != password => {
                    return LoginOutcome::Rejected(LoginResponse::InvalidCredentials);
                }
                Some(account) => account.rights,
                None => return LoginOutcome::Rejected(LoginResponse::InvalidCredentials),
            }
        };

        match self.load_profile(&username) {
            Ok(Some(mut profile)) => {
                profile.rights = profile.rights.max(rights);
                LoginOutcome::Accepted(profile)
            }
            Ok(None) => {
                let mut profile = PlayerProfile::fresh(&username);
                profile.rights = rights;
                LoginOutcome::Accepted(profile)
            }
            Err(e) => {
                warn!(username = %username, error = %e, "Failed to load player profile");
                LoginOutcome::Rejected(LoginResponse::CouldNotCompleteLogin)
            }
        }
    }

    /// Load a profile from disk, `None` for a never-saved player
    pub fn load_profile(&self, username: &str) -> Result<Option<PlayerProfile>> {
        let path = self.profile_path(username);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let profile = serde_json::from_str(&content)
            .map_err(|e| RunevaleError::Internal(format!("corrupt profile: {}", e)))?;
        Ok(Some(profile))
    }

    /// Persist a player's profile.
    ///
    /// Blocking; run on the background lane. Failures are logged and
    /// swallowed - a failed save must never take the server down.
    pub fn save_player(&self, player: &Player) {
        let profile = PlayerProfile {
            username: player.username.clone(),
            rights: player.rights(),
            location: player.location(),
            appearance: player.appearance(),
        };

        if let Err(e) = self.write_profile(&profile) {
            warn!(username = %player.username, error = %e, "Failed to save player");
        } else {
            debug!(username = %player.username, "Player saved");
        }
    }

    fn write_profile(&self, profile: &PlayerProfile) -> Result<()> {
        fs::create_dir_all(&self.save_dir)?;
        let content = serde_json::to_string_pretty(profile)
            .map_err(|e| RunevaleError::Internal(format!("serialize profile: {}", e)))?;
        fs::write(self.profile_path(&profile.username), content)?;
        Ok(())
    }

    fn profile_path(&self, username: &str) -> PathBuf {
        self.save_dir.join(format!("{}.json", username))
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("dev_mode", &self.dev_mode)
            .field("accounts", &self.accounts.len())
            .field("save_dir", &self.save_dir)
            .finish()
    }
}
