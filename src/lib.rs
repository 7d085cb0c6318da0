#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, EngineFairing, SweeperFairing};
use crate::logging::LoggerFairing;

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod store;
pub mod ticker;

/// Build the server, with its store chosen by configuration.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(EngineFairing::from_config())
        .attach(SweeperFairing)
}

/// Build the server over the given store.
#[cfg(test)]
pub(crate) fn rocket_for_store(store: std::sync::Arc<dyn store::BallotStore>) -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(EngineFairing::with_store(store))
        .attach(SweeperFairing)
}
