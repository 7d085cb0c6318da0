use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use log::{error, info};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::engine::{ClaimSweeper, Engine, SessionSettings};
use crate::model::{api::admin::AdminCredentials, db::admin::ensure_admin_exists};
use crate::store::{BallotStore, MemoryStore, MongoStore};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    auth_ttl: u32,
    #[serde(default = "default_max_selections")]
    max_selections: usize,
    #[serde(default = "default_session_window")]
    session_window: u32,
    #[serde(default = "default_tick_millis")]
    tick_millis: u64,
    #[serde(default = "default_sweep_interval")]
    sweep_interval: u64,
    #[serde(default = "default_claim_grace")]
    claim_grace: u32,
    // secrets
    jwt_secret: String,
}

fn default_max_selections() -> usize {
    2
}

fn default_session_window() -> u32 {
    60
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_claim_grace() -> u32 {
    60
}

impl Config {
    /// Valid lifetime of admin auth token cookies in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// Secret key used to sign JWTs.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Wall-clock length of a voting session.
    pub fn session_window(&self) -> Duration {
        self.session_settings().window()
    }

    /// How long after its deadline an abandoned claim is released by the sweeper.
    pub fn claim_grace(&self) -> Duration {
        Duration::seconds(self.claim_grace.into())
    }

    /// Time between orphaned claim sweeps.
    pub fn sweep_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.sweep_interval)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            max_selections: self.max_selections,
            window_ticks: self.session_window,
            tick_interval: StdDuration::from_millis(self.tick_millis),
            self_ticking: true,
        }
    }

    /// Reject settings the engine cannot run with.
    fn validate(&self) -> Result<(), String> {
        if self.max_selections == 0 {
            return Err("`max_selections` must be at least 1".to_string());
        }
        if self.session_window == 0 || self.tick_millis == 0 {
            return Err("`session_window` and `tick_millis` must be at least 1".to_string());
        }
        if self.sweep_interval == 0 {
            return Err("`sweep_interval` must be at least 1".to_string());
        }
        if self.jwt_secret.is_empty() {
            return Err("`jwt_secret` must not be empty".to_string());
        }
        Ok(())
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if let Err(e) = config.validate() {
            error!("Invalid application config: {e}");
            return Err(rocket);
        }

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Which storage backend to run on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Mongodb,
    Memory,
}

/// Configuration for the store.
#[derive(Deserialize)]
struct StoreConfig {
    // non-secrets
    store: StoreKind,
    #[serde(default = "default_db_name")]
    db_name: String,
    default_admin_username: Option<String>,
    // secrets
    db_uri: Option<String>,
    default_admin_password: Option<String>,
}

fn default_db_name() -> String {
    "ballots".to_string()
}

impl StoreConfig {
    fn default_admin(&self) -> Option<AdminCredentials> {
        match (&self.default_admin_username, &self.default_admin_password) {
            (Some(username), Some(password)) => Some(AdminCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

/// A fairing that opens the store, ensures there is an admin, and places
/// the [`Engine`] into managed state.
///
/// Requires [`ConfigFairing`] to have run first.
pub struct EngineFairing {
    store: Option<Arc<dyn BallotStore>>,
}

impl EngineFairing {
    /// Open the store described by the configuration.
    pub fn from_config() -> Self {
        Self { store: None }
    }

    /// Run on the given, already prepared store.
    pub fn with_store(store: Arc<dyn BallotStore>) -> Self {
        Self { store: Some(store) }
    }
}

#[rocket::async_trait]
impl Fairing for EngineFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ballot engine",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let settings = match rocket.state::<Config>() {
            Some(config) => config.session_settings(),
            None => {
                error!("Engine started before the application config was loaded");
                return Err(rocket);
            }
        };

        let store = match &self.store {
            Some(store) => store.clone(),
            None => match open_store(&rocket).await {
                Some(store) => store,
                None => return Err(rocket),
            },
        };

        info!(
            "Sessions allow {} selection(s) over {} tick(s) of {}ms",
            settings.max_selections,
            settings.window_ticks,
            settings.tick_interval.as_millis()
        );
        rocket = rocket.manage(Engine::new(store, settings));
        Ok(rocket)
    }
}

/// Open the configured store and ensure it has at least one admin.
async fn open_store(rocket: &Rocket<Build>) -> Option<Arc<dyn BallotStore>> {
    // Load the config.
    let config = match rocket.figment().extract::<StoreConfig>() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load store config");
            rocket::config::pretty_print_error(e);
            return None;
        }
    };

    let store: Arc<dyn BallotStore> = match config.store {
        StoreKind::Memory => {
            info!("Using in-memory store; nothing will be persisted");
            Arc::new(MemoryStore::new())
        }
        StoreKind::Mongodb => {
            let Some(uri) = config.db_uri.as_deref() else {
                error!("`db_uri` must be set to use the MongoDB store");
                return None;
            };
            info!("Loaded database config, connecting...");
            match MongoStore::connect(uri, &config.db_name).await {
                Ok(store) => {
                    info!("...database connection online!");
                    Arc::new(store)
                }
                Err(e) => {
                    error!("Failed to connect to database: {e}");
                    return None;
                }
            }
        }
    };

    match config.default_admin() {
        Some(credentials) => {
            if let Err(e) = ensure_admin_exists(store.as_ref(), credentials).await {
                error!("Failed to ensure an admin exists: {e}");
                return None;
            }
        }
        None => info!("No default admin configured"),
    }

    Some(store)
}

/// A fairing that starts the orphaned claim sweeper and places it into managed state.
///
/// Requires [`EngineFairing`] to have run first.
pub struct SweeperFairing;

#[rocket::async_trait]
impl Fairing for SweeperFairing {
    fn info(&self) -> Info {
        Info {
            name: "Claim sweeper",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (engine, interval, grace) = match (rocket.state::<Engine>(), rocket.state::<Config>()) {
            (Some(engine), Some(config)) => {
                (engine.clone(), config.sweep_interval(), config.claim_grace())
            }
            _ => {
                error!("Sweeper started before the engine was ready");
                return Err(rocket);
            }
        };

        let sweeper = ClaimSweeper::start(engine, interval, grace);
        Ok(rocket.manage(sweeper))
    }
}
