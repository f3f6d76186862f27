use crate::simulation::bike::{Bike, BikeType};
use crate::simulation::config::Config;
use crate::simulation::id::{SiteId, VanId};
use crate::simulation::observer::BikingObserver;
use crate::simulation::random::travel_time_ms;
use crate::simulation::scenario::Stations;
use crate::simulation::station::BikeStation;
use derive_builder::Builder;
use rand::rngs::SmallRng;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, trace};

#[derive(Debug, Clone, PartialEq, Builder)]
pub struct VanSettings {
    pub van_capacity: usize,
    /// Capacity of a regular site. The van aims at two free slots per site.
    pub bornes: usize,
    /// How many bikes the van tries to take along from the depot at the start of a cycle.
    #[builder(default = "2")]
    pub depot_load: usize,
    #[builder(default)]
    pub min_travel_ms: u64,
    #[builder(default)]
    pub max_travel_ms: u64,
    #[builder(default)]
    pub time_scale: f32,
}

impl VanSettings {
    pub fn from_config(config: &Config) -> Self {
        VanSettings {
            van_capacity: config.fleet.van_capacity,
            bornes: config.network.bornes,
            depot_load: 2,
            min_travel_ms: config.fleet.min_travel_ms,
            max_travel_ms: config.fleet.max_travel_ms,
            time_scale: config.fleet.time_scale,
        }
    }

    pub fn target(&self) -> usize {
        self.bornes.saturating_sub(2)
    }
}

/// Whether the run loop should stop. A dropped sender counts as a stop request.
pub(crate) fn is_cancelled(shutdown: &watch::Receiver<bool>) -> bool {
    shutdown.has_changed().is_err() || *shutdown.borrow()
}

/// A van which cycles through all sites and moves bikes from crowded sites to empty ones.
///
/// The cargo belongs to the van alone. Every bike leaving a station through the van ends up either
/// in the cargo or in another station, never in both.
pub struct Van {
    id: VanId,
    current_site: SiteId,
    cargo: Vec<Bike>,
    stations: Arc<Stations>,
    observer: Arc<dyn BikingObserver>,
    settings: VanSettings,
    rng: SmallRng,
}

impl Debug for Van {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Van {{ id: {}, current_site: {:?}, cargo: {} }}",
            self.id,
            self.current_site,
            self.cargo.len()
        )
    }
}

impl Van {
    pub fn new(
        id: VanId,
        stations: Arc<Stations>,
        observer: Arc<dyn BikingObserver>,
        settings: VanSettings,
        rng: SmallRng,
    ) -> Self {
        let depot = stations.depot_id();
        Van {
            id,
            current_site: depot,
            cargo: Vec::with_capacity(settings.van_capacity),
            stations,
            observer,
            settings,
            rng,
        }
    }

    pub fn current_site(&self) -> SiteId {
        self.current_site
    }

    pub fn cargo_len(&self) -> usize {
        self.cargo.len()
    }

    /// Cycles depot → every site → depot until `shutdown` carries `true` or its sender is dropped.
    /// The signal is checked after every step.
    ///
    /// On the way out, the van brings its cargo back to the depot. Bikes the depot does not accept
    /// are returned, so the caller owns them afterwards.
    pub fn run(&mut self, shutdown: &watch::Receiver<bool>) -> Vec<Bike> {
        info!("Van {} starts", self.id);
        let stations = self.stations.clone();

        'cycle: while !is_cancelled(shutdown) {
            self.load_at_depot();
            if is_cancelled(shutdown) {
                break;
            }

            for site in stations.site_ids() {
                self.drive_to(site);
                if is_cancelled(shutdown) {
                    break 'cycle;
                }
                self.balance_site(site);
                if is_cancelled(shutdown) {
                    break 'cycle;
                }
            }

            self.return_to_depot();
        }

        let leftover = self.surrender_cargo();
        self.log(format!("Van {} stops cleanly", self.id));
        leftover
    }

    /// Moves the van to `destination`. Travel takes a random amount of time, which is reported to
    /// the observer and, with a positive time scale, slept for.
    pub fn drive_to(&mut self, destination: SiteId) {
        if self.current_site == destination {
            return;
        }

        let travel_time = travel_time_ms(
            &mut self.rng,
            self.settings.min_travel_ms,
            self.settings.max_travel_ms,
        );
        self.observer
            .on_travel(self.current_site, destination, travel_time);
        trace!(
            van = self.id.0,
            from = self.current_site.index(),
            to = destination.index(),
            travel_time
        );

        if self.settings.time_scale > 0. {
            let scaled = (travel_time as f64 * self.settings.time_scale as f64) as u64;
            thread::sleep(Duration::from_millis(scaled));
        }

        self.current_site = destination;
    }

    /// Starts a cycle at the depot. Cargo left over from the previous cycle goes back into the depot
    /// first; whatever the depot rejects stays on board. Then the van takes up to `depot_load` bikes
    /// along, as far as the depot has them and the cargo has room.
    #[instrument(level = "trace", skip(self), fields(van = self.id.0))]
    pub fn load_at_depot(&mut self) {
        let depot_id = self.stations.depot_id();
        self.drive_to(depot_id);
        let depot = self.stations.depot().clone();

        if !self.cargo.is_empty() {
            let residual = std::mem::take(&mut self.cargo);
            let nb_residual = residual.len();
            self.cargo = depot.add_bikes(residual);
            debug!(
                van = self.id.0,
                returned = nb_residual - self.cargo.len(),
                kept = self.cargo.len(),
                "returned residual cargo to depot"
            );
        }

        let to_load = self
            .settings
            .depot_load
            .min(depot.nb_bikes())
            .min(self.free_slots());
        if to_load > 0 {
            let bikes = depot.get_bikes(to_load);
            let loaded = bikes.len();
            self.cargo.extend(bikes);
            self.log(format!("Van {} loaded {} bikes at depot", self.id, loaded));
        }

        self.observer
            .on_occupancy_changed(depot_id, depot.nb_bikes());
    }

    /// Pulls the occupancy of `site` toward `bornes - 2`: surplus bikes are picked up first, then
    /// missing ones are dropped off from the cargo. Bike types the site lacks are dropped first.
    /// The depot is never balanced.
    #[instrument(level = "trace", skip(self), fields(van = self.id.0))]
    pub fn balance_site(&mut self, site: SiteId) {
        if site == self.stations.depot_id() {
            return;
        }

        let station = self.stations.get(site).clone();
        let target = self.settings.target();

        let occupancy = station.nb_bikes();
        let free = self.free_slots();
        if occupancy > target && free > 0 {
            let taken = station.get_bikes((occupancy - target).min(free));
            if !taken.is_empty() {
                self.log(format!(
                    "Van {} took {} bikes from site {}",
                    self.id,
                    taken.len(),
                    site
                ));
            }
            self.cargo.extend(taken);
        }

        let occupancy = station.nb_bikes();
        if occupancy < target && !self.cargo.is_empty() {
            let count = (target - occupancy).min(self.cargo.len());
            let to_drop = self.select_drop_set(&station, count);
            let offered = to_drop.len();

            let rejected = station.add_bikes(to_drop);
            self.log(format!(
                "Van {} deposited {} bikes at site {}",
                self.id,
                offered - rejected.len(),
                site
            ));
            self.cargo.extend(rejected);
        }

        self.observer.on_occupancy_changed(site, station.nb_bikes());
    }

    /// Ends a cycle: drives to the depot and unloads everything the depot accepts.
    #[instrument(level = "trace", skip(self), fields(van = self.id.0))]
    pub fn return_to_depot(&mut self) {
        let depot_id = self.stations.depot_id();
        self.drive_to(depot_id);
        let depot = self.stations.depot().clone();

        if !self.cargo.is_empty() {
            let cargo = std::mem::take(&mut self.cargo);
            self.cargo = depot.add_bikes(cargo);
            debug!(van = self.id.0, kept = self.cargo.len(), "unloaded at depot");
        }

        self.observer
            .on_occupancy_changed(depot_id, depot.nb_bikes());
    }

    /// Removes the first cargo bike of the given type. The order of the remaining cargo may change.
    pub fn take_bike_from_cargo(&mut self, bike_type: BikeType) -> Option<Bike> {
        let pos = self
            .cargo
            .iter()
            .position(|b| b.bike_type() == bike_type)?;
        Some(self.cargo.swap_remove(pos))
    }

    /// Picks `count` bikes from the cargo. One bike of every type the station currently lacks comes
    /// first, in ascending type order; the rest is taken from the back of the cargo.
    fn select_drop_set(&mut self, station: &BikeStation, count: usize) -> Vec<Bike> {
        let mut to_drop = Vec::with_capacity(count);

        let absent: Vec<BikeType> = (0..station.nb_bike_types())
            .map(BikeType)
            .filter(|t| station.count_bikes_of_type(*t) == 0)
            .collect();
        for bike_type in absent {
            if to_drop.len() >= count {
                break;
            }
            if let Some(bike) = self.take_bike_from_cargo(bike_type) {
                to_drop.push(bike);
            }
        }

        let missing = count - to_drop.len();
        let keep = self.cargo.len().saturating_sub(missing);
        to_drop.extend(self.cargo.drain(keep..));
        to_drop
    }

    fn surrender_cargo(&mut self) -> Vec<Bike> {
        let depot_id = self.stations.depot_id();
        self.drive_to(depot_id);
        if self.cargo.is_empty() {
            return Vec::new();
        }

        let depot = self.stations.depot().clone();
        let rejected = depot.add_bikes(std::mem::take(&mut self.cargo));
        self.observer
            .on_occupancy_changed(depot_id, depot.nb_bikes());
        rejected
    }

    fn free_slots(&self) -> usize {
        self.settings.van_capacity.saturating_sub(self.cargo.len())
    }

    fn log(&self, msg: String) {
        debug!("{msg}");
        self.observer.on_log_message(&msg);
    }
}
