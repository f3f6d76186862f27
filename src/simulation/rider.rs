use crate::simulation::bike::{Bike, BikeType};
use crate::simulation::config::Config;
use crate::simulation::id::{RiderId, SiteId};
use crate::simulation::random::travel_time_ms;
use crate::simulation::scenario::Stations;
use crate::simulation::van::is_cancelled;
use rand::rngs::SmallRng;
use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct RiderSettings {
    pub min_ride_ms: u64,
    pub max_ride_ms: u64,
    pub time_scale: f32,
}

impl RiderSettings {
    pub fn from_config(config: &Config) -> Self {
        RiderSettings {
            min_ride_ms: config.riders.min_ride_ms,
            max_ride_ms: config.riders.max_ride_ms,
            time_scale: config.riders.time_scale,
        }
    }
}

/// A customer who rents a bike at one site and returns it at another. Riders use the blocking
/// station operations, so they wait for a bike of the wanted type and for a free slot at the
/// destination.
#[derive(Debug)]
pub struct Rider {
    id: RiderId,
    stations: Arc<Stations>,
    settings: RiderSettings,
    rng: SmallRng,
    rides: u64,
}

impl Rider {
    pub fn new(
        id: RiderId,
        stations: Arc<Stations>,
        settings: RiderSettings,
        rng: SmallRng,
    ) -> Self {
        Rider {
            id,
            stations,
            settings,
            rng,
            rides: 0,
        }
    }

    pub fn rides(&self) -> u64 {
        self.rides
    }

    /// Rides until `shutdown` fires or a station turns out to be shut down. A bike which could not
    /// be returned because its destination was shut down is handed back to the caller.
    pub fn run(&mut self, shutdown: &watch::Receiver<bool>) -> Option<Bike> {
        let nb_types = self.stations.depot().nb_bike_types();

        while !is_cancelled(shutdown) {
            let origin = self.random_site(None);
            let bike_type = BikeType(self.rng.random_range(0..nb_types));

            let Some(bike) = self.stations.get(origin).get_bike(bike_type) else {
                break;
            };

            let destination = self.random_site(Some(origin));
            self.ride();

            if let Err(closed) = self.stations.get(destination).put_bike(bike) {
                debug!("Rider {} could not return its bike at site {}", self.id, destination);
                info!("Rider {} stops after {} rides", self.id, self.rides);
                return Some(closed.into_bike());
            }
            self.rides += 1;
        }

        info!("Rider {} stops after {} rides", self.id, self.rides);
        None
    }

    /// A uniformly drawn regular site, different from `exclude` whenever there is a choice.
    fn random_site(&mut self, exclude: Option<SiteId>) -> SiteId {
        let nb_sites = self.stations.nb_sites();
        match exclude {
            Some(excluded) if nb_sites > 1 => {
                let i = self.rng.random_range(0..nb_sites - 1);
                if i >= excluded.index() {
                    SiteId(i + 1)
                } else {
                    SiteId(i)
                }
            }
            _ => SiteId(self.rng.random_range(0..nb_sites)),
        }
    }

    fn ride(&mut self) {
        let ride_time = travel_time_ms(
            &mut self.rng,
            self.settings.min_ride_ms,
            self.settings.max_ride_ms,
        );
        if self.settings.time_scale > 0. {
            let scaled = (ride_time as f64 * self.settings.time_scale as f64) as u64;
            thread::sleep(Duration::from_millis(scaled));
        }
    }
}
