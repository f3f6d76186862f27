use crate::simulation::bike::BikeFactory;
use crate::simulation::config::Config;
use crate::simulation::id::SiteId;
use crate::simulation::station::BikeStation;
use std::sync::Arc;
use tracing::info;

/// The station table shared by vans and riders. Regular sites occupy ids `0..nb_sites`, the depot
/// has id `nb_sites`.
#[derive(Debug)]
pub struct Stations {
    stations: Vec<Arc<BikeStation>>,
}

impl Stations {
    pub fn new(sites: Vec<BikeStation>, depot: BikeStation) -> Self {
        let mut stations: Vec<Arc<BikeStation>> = sites.into_iter().map(Arc::new).collect();
        stations.push(Arc::new(depot));
        Stations { stations }
    }

    pub fn nb_sites(&self) -> usize {
        self.stations.len() - 1
    }

    pub fn depot_id(&self) -> SiteId {
        SiteId(self.nb_sites())
    }

    pub fn depot(&self) -> &Arc<BikeStation> {
        &self.stations[self.nb_sites()]
    }

    /// Panics if the site does not belong to this table.
    pub fn get(&self, site: SiteId) -> &Arc<BikeStation> {
        &self.stations[site.index()]
    }

    /// Ids of the regular sites, in visiting order. The depot is not included.
    pub fn site_ids(&self) -> impl Iterator<Item = SiteId> {
        (0..self.nb_sites()).map(SiteId)
    }

    /// All stations including the depot, with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (SiteId, &Arc<BikeStation>)> {
        self.stations
            .iter()
            .enumerate()
            .map(|(i, s)| (SiteId(i), s))
    }

    pub fn total_bikes(&self) -> usize {
        self.stations.iter().map(|s| s.nb_bikes()).sum()
    }

    /// Shuts down every station, releasing all blocked callers.
    pub fn ending(&self) {
        for station in &self.stations {
            station.ending();
        }
    }
}

/// A station table populated with the initial bikes of a run.
#[derive(Debug)]
pub struct Scenario {
    pub stations: Arc<Stations>,
    pub bikes_created: u64,
}

impl Scenario {
    pub fn build(config: &Config) -> Self {
        let network = &config.network;
        let simulation = &config.simulation;
        let mut factory = BikeFactory::new();

        let sites: Vec<BikeStation> = (0..network.nb_sites)
            .map(|_| {
                let station = BikeStation::new(network.bornes, network.nb_bike_types);
                let rejected = station.add_bikes(factory.create_round_robin(
                    simulation.initial_bikes_per_site,
                    network.nb_bike_types,
                ));
                assert!(rejected.is_empty(), "Initial bikes exceed site capacity.");
                station
            })
            .collect();

        let depot = BikeStation::new(network.depot_capacity, network.nb_bike_types);
        let rejected = depot.add_bikes(
            factory.create_round_robin(simulation.initial_depot_bikes, network.nb_bike_types),
        );
        assert!(rejected.is_empty(), "Initial bikes exceed depot capacity.");

        info!(
            "Created {} sites with capacity {} and depot {} with capacity {}. {} bikes in total.",
            network.nb_sites,
            network.bornes,
            config.depot_id(),
            network.depot_capacity,
            factory.created()
        );

        Scenario {
            stations: Arc::new(Stations::new(sites, depot)),
            bikes_created: factory.created(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depot_follows_sites() {
        let stations = Stations::new(
            vec![BikeStation::new(4, 2), BikeStation::new(4, 2)],
            BikeStation::new(50, 2),
        );
        assert_eq!(stations.nb_sites(), 2);
        assert_eq!(stations.depot_id(), SiteId(2));
        assert_eq!(stations.depot().nb_slots(), 50);
        assert_eq!(
            stations.site_ids().collect::<Vec<_>>(),
            vec![SiteId(0), SiteId(1)]
        );
        assert_eq!(stations.iter().count(), 3);
    }

    #[test]
    fn build_seeds_initial_bikes() {
        let mut config = Config::default();
        config.network.nb_sites = 3;
        config.network.bornes = 5;
        config.simulation.initial_bikes_per_site = 4;
        config.simulation.initial_depot_bikes = 7;

        let scenario = Scenario::build(&config);

        assert_eq!(scenario.bikes_created, 19);
        assert_eq!(scenario.stations.total_bikes(), 19);
        for site in scenario.stations.site_ids() {
            assert_eq!(scenario.stations.get(site).nb_bikes(), 4);
        }
        assert_eq!(scenario.stations.depot().nb_bikes(), 7);
    }

    #[test]
    fn ending_reaches_every_station() {
        let stations = Stations::new(vec![BikeStation::new(4, 1)], BikeStation::new(8, 1));
        stations.ending();
        assert!(stations.iter().all(|(_, s)| s.is_ending()));
    }
}
