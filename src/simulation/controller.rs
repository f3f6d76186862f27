use crate::simulation::bike::Bike;
use crate::simulation::config::{Config, ConfigError};
use crate::simulation::id::{RiderId, SiteId, VanId};
use crate::simulation::observer::{BikingObserver, ObserverSet};
use crate::simulation::random::get_rnd;
use crate::simulation::rider::{Rider, RiderSettings};
use crate::simulation::scenario::{Scenario, Stations};
use crate::simulation::van::{Van, VanSettings};
use derive_builder::Builder;
use itertools::Itertools;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::dispatcher::Dispatch;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("thread {0} panicked")]
    WorkerPanicked(String),
    #[error("failed to write {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize summary: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// What a finished run looks like. `bikes_accounted` counts every bike found after shutdown, in
/// stations, surrendered by vans or still held by riders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationSummary {
    pub bikes_created: u64,
    pub bikes_accounted: u64,
    pub occupancies: Vec<(SiteId, usize)>,
    pub rides: u64,
    pub surrendered_by_vans: usize,
    pub held_by_riders: usize,
}

impl SimulationSummary {
    /// No bike was lost or duplicated during the run.
    pub fn is_conserved(&self) -> bool {
        self.bikes_created == self.bikes_accounted
    }
}

/// Runs vans and riders on their own threads for the configured time, then shuts everything down
/// in an order which keeps every bike accounted for:
///
/// 1. the shutdown signal stops vans and riders at their next check,
/// 2. vans are joined first, they return their cargo to the still open depot,
/// 3. all stations end, which releases riders blocked in a station,
/// 4. riders are joined, then the stations are emptied and counted.
#[derive(Debug, Builder)]
#[builder(pattern = "owned")]
pub struct Controller {
    config: Arc<Config>,
    #[builder(default)]
    observers: ObserverSet,
}

impl Controller {
    pub fn run(&self) -> Result<SimulationSummary, SimulationError> {
        self.config.validate()?;
        let scenario = Scenario::build(&self.config);
        self.run_scenario(scenario)
    }

    pub fn run_scenario(&self, scenario: Scenario) -> Result<SimulationSummary, SimulationError> {
        let stations = scenario.stations;
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let dispatch = tracing::dispatcher::get_default(|current| current.clone());

        info!(
            "Starting simulation with {} vans and {} riders.",
            self.config.fleet.nb_vans, self.config.riders.nb_riders
        );

        let mut errors = Vec::new();
        let vans = self.spawn_vans(&stations, &shutdown_receiver, &dispatch, &mut errors);
        let riders = self.spawn_riders(&stations, &shutdown_receiver, &dispatch, &mut errors);

        if errors.is_empty() {
            thread::sleep(Duration::from_millis(self.config.simulation.duration_ms));
        }

        info!("Sending shutdown signal.");
        shutdown_sender.send_replace(true);

        let mut surrendered: Vec<Bike> = Vec::new();
        for (name, handle) in vans {
            match handle.join() {
                Ok(leftover) => surrendered.extend(leftover),
                Err(_) => errors.push(SimulationError::WorkerPanicked(name)),
            }
        }

        stations.ending();

        let mut rides = 0;
        let mut held: Vec<Bike> = Vec::new();
        for (name, handle) in riders {
            match handle.join() {
                Ok((nb_rides, bike)) => {
                    rides += nb_rides;
                    held.extend(bike);
                }
                Err(_) => errors.push(SimulationError::WorkerPanicked(name)),
            }
        }

        if let Some(error) = errors.into_iter().next() {
            return Err(error);
        }

        let summary = Self::account(&stations, scenario.bikes_created, rides, surrendered, held);
        info!(
            "Final occupancies: {}",
            summary
                .occupancies
                .iter()
                .map(|(site, count)| format!("{site}: {count}"))
                .join(", ")
        );
        if summary.is_conserved() {
            info!("All {} bikes accounted for.", summary.bikes_created);
        } else {
            warn!(
                "Created {} bikes but found {}.",
                summary.bikes_created, summary.bikes_accounted
            );
        }
        Ok(summary)
    }

    fn spawn_vans(
        &self,
        stations: &Arc<Stations>,
        shutdown: &watch::Receiver<bool>,
        dispatch: &Dispatch,
        errors: &mut Vec<SimulationError>,
    ) -> Vec<(String, JoinHandle<Vec<Bike>>)> {
        let observer: Arc<dyn BikingObserver> = Arc::new(self.observers.clone());
        let settings = VanSettings::from_config(&self.config);
        let seed = self.config.simulation.seed;

        (0..self.config.fleet.nb_vans)
            .filter_map(|i| {
                let mut van = Van::new(
                    VanId(i),
                    stations.clone(),
                    observer.clone(),
                    settings.clone(),
                    get_rnd(seed, ("van", i)),
                );
                let shutdown = shutdown.clone();
                let dispatch = dispatch.clone();
                let name = format!("van-{i}");
                let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
                    tracing::dispatcher::with_default(&dispatch, || van.run(&shutdown))
                });
                match spawned {
                    Ok(handle) => Some((name, handle)),
                    Err(source) => {
                        errors.push(SimulationError::Spawn { name, source });
                        None
                    }
                }
            })
            .collect()
    }

    fn spawn_riders(
        &self,
        stations: &Arc<Stations>,
        shutdown: &watch::Receiver<bool>,
        dispatch: &Dispatch,
        errors: &mut Vec<SimulationError>,
    ) -> Vec<(String, JoinHandle<(u64, Option<Bike>)>)> {
        let settings = RiderSettings::from_config(&self.config);
        let seed = self.config.simulation.seed;

        (0..self.config.riders.nb_riders)
            .filter_map(|i| {
                let mut rider = Rider::new(
                    RiderId(i),
                    stations.clone(),
                    settings.clone(),
                    get_rnd(seed, ("rider", i)),
                );
                let shutdown = shutdown.clone();
                let dispatch = dispatch.clone();
                let name = format!("rider-{i}");
                let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
                    tracing::dispatcher::with_default(&dispatch, || {
                        let held = rider.run(&shutdown);
                        (rider.rides(), held)
                    })
                });
                match spawned {
                    Ok(handle) => Some((name, handle)),
                    Err(source) => {
                        errors.push(SimulationError::Spawn { name, source });
                        None
                    }
                }
            })
            .collect()
    }

    fn account(
        stations: &Stations,
        bikes_created: u64,
        rides: u64,
        surrendered: Vec<Bike>,
        held: Vec<Bike>,
    ) -> SimulationSummary {
        let occupancies: Vec<(SiteId, usize)> = stations
            .iter()
            .map(|(site, station)| (site, station.nb_bikes()))
            .collect();
        let in_stations: usize = stations.iter().map(|(_, s)| s.drain().len()).sum();

        SimulationSummary {
            bikes_created,
            bikes_accounted: (in_stations + surrendered.len() + held.len()) as u64,
            occupancies,
            rides,
            surrendered_by_vans: surrendered.len(),
            held_by_riders: held.len(),
        }
    }
}

pub fn write_summary(
    summary: &SimulationSummary,
    output_path: &Path,
) -> Result<PathBuf, SimulationError> {
    let path = output_path.join("summary.yml");
    let file = File::create(&path).map_err(|source| SimulationError::Output {
        path: path.clone(),
        source,
    })?;
    serde_yaml::to_writer(BufWriter::new(file), summary)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::bike::BikeFactory;
    use crate::simulation::station::BikeStation;

    #[test]
    fn account_counts_every_container() {
        let stations = Stations::new(vec![BikeStation::new(4, 1)], BikeStation::new(10, 1));
        let mut factory = BikeFactory::new();
        assert!(stations
            .get(SiteId(0))
            .add_bikes(factory.create_round_robin(3, 1))
            .is_empty());
        assert!(stations
            .depot()
            .add_bikes(factory.create_round_robin(2, 1))
            .is_empty());
        let surrendered = factory.create_round_robin(1, 1);
        let held = factory.create_round_robin(1, 1);

        let summary = Controller::account(&stations, factory.created(), 9, surrendered, held);

        assert!(summary.is_conserved());
        assert_eq!(summary.occupancies, vec![(SiteId(0), 3), (SiteId(1), 2)]);
        assert_eq!(summary.rides, 9);
        assert_eq!(stations.total_bikes(), 0);
    }

    #[test]
    fn run_rejects_invalid_config() {
        let mut config = Config::default();
        config.network.nb_bike_types = 0;
        let controller = ControllerBuilder::default()
            .config(Arc::new(config))
            .build()
            .unwrap();

        assert!(matches!(
            controller.run(),
            Err(SimulationError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn run_rejects_initial_bikes_above_capacity() {
        let mut config = Config::default();
        config.simulation.initial_depot_bikes = config.network.depot_capacity + 1;
        let controller = ControllerBuilder::default()
            .config(Arc::new(config))
            .build()
            .unwrap();

        assert!(controller.run().is_err());
    }

    #[test]
    fn builder_requires_config() {
        assert!(ControllerBuilder::default().build().is_err());
    }
}
