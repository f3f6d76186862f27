use crate::simulation::id::BikeId;
use std::fmt::{Debug, Formatter};

/// Category of a bike. Stations partition their storage by this value. Values outside the
/// configured range are legal to construct, stations file them under type 0.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BikeType(pub usize);

impl BikeType {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Debug for BikeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

/// A single bike. Neither `Clone` nor `Copy`, whoever holds the value owns the bike.
#[derive(Debug, PartialEq, Eq)]
pub struct Bike {
    id: BikeId,
    bike_type: BikeType,
}

impl Bike {
    pub fn new(id: BikeId, bike_type: BikeType) -> Self {
        Bike { id, bike_type }
    }

    pub fn id(&self) -> BikeId {
        self.id
    }

    pub fn bike_type(&self) -> BikeType {
        self.bike_type
    }
}

/// Hands out bikes with consecutive ids. Used by scenario setup and tests.
#[derive(Debug, Default)]
pub struct BikeFactory {
    next_id: u64,
}

impl BikeFactory {
    pub fn new() -> Self {
        BikeFactory { next_id: 0 }
    }

    pub fn create(&mut self, bike_type: BikeType) -> Bike {
        let bike = Bike::new(BikeId(self.next_id), bike_type);
        self.next_id += 1;
        bike
    }

    /// Creates `n` bikes whose types cycle through `0..nb_bike_types`.
    pub fn create_round_robin(&mut self, n: usize, nb_bike_types: usize) -> Vec<Bike> {
        (0..n)
            .map(|i| self.create(BikeType(i % nb_bike_types.max(1))))
            .collect()
    }

    pub fn created(&self) -> u64 {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_assigns_unique_ids() {
        let mut factory = BikeFactory::new();
        let a = factory.create(BikeType(0));
        let b = factory.create(BikeType(0));
        assert_ne!(a.id(), b.id());
        assert_eq!(factory.created(), 2);
    }

    #[test]
    fn round_robin_cycles_types() {
        let mut factory = BikeFactory::new();
        let types: Vec<usize> = factory
            .create_round_robin(5, 2)
            .iter()
            .map(|b| b.bike_type().index())
            .collect();
        assert_eq!(types, vec![0, 1, 0, 1, 0]);
    }
}
