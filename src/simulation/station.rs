use crate::simulation::bike::{Bike, BikeType};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use thiserror::Error;
use tracing::trace;

/// Returned by [BikeStation::put_bike] when the station shut down before the bike could be stored.
/// The bike travels back to the caller inside the error, so it is never lost.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("station is ending, {0:?} was not stored")]
pub struct StationClosed(pub Bike);

impl StationClosed {
    pub fn into_bike(self) -> Bike {
        self.0
    }
}

/// Everything guarded by the station lock. `current_count` always equals the summed queue lengths
/// once a mutator releases the lock.
struct StationState {
    queues: Vec<VecDeque<Bike>>,
    current_count: usize,
    ending: bool,
}

impl StationState {
    /// Types outside the known range are filed under type 0.
    fn slot_for(&self, bike_type: BikeType) -> usize {
        if bike_type.index() < self.queues.len() {
            bike_type.index()
        } else {
            0
        }
    }

    /// Stores the bike at the back of its type queue and returns the queue index used.
    fn insert(&mut self, bike: Bike) -> usize {
        let slot = self.slot_for(bike.bike_type());
        self.queues[slot].push_back(bike);
        self.current_count += 1;
        slot
    }
}

/// A capacity-bounded store of bikes, partitioned by bike type.
///
/// Single-item operations ([BikeStation::put_bike], [BikeStation::get_bike]) block the calling
/// thread until they can proceed or the station is shut down via [BikeStation::ending]. Bulk
/// operations ([BikeStation::add_bikes], [BikeStation::get_bikes]) never block; they apply as much
/// of the request as possible and hand the rest back to the caller.
///
/// Within one bike type, bikes leave the station in the order they arrived.
pub struct BikeStation {
    capacity: usize,
    state: Mutex<StationState>,
    not_full: Condvar,
    // one per bike type, so that a producer only wakes consumers waiting for the type it delivered
    not_empty: Vec<Condvar>,
}

impl Debug for BikeStation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        write!(
            f,
            "BikeStation {{ capacity: {}, bikes: {}, types: {}, ending: {} }}",
            self.capacity,
            state.current_count,
            state.queues.len(),
            state.ending
        )
    }
}

impl BikeStation {
    pub fn new(capacity: usize, nb_bike_types: usize) -> Self {
        assert!(nb_bike_types > 0, "A station needs at least one bike type.");
        BikeStation {
            capacity,
            state: Mutex::new(StationState {
                queues: (0..nb_bike_types).map(|_| VecDeque::new()).collect(),
                current_count: 0,
                ending: false,
            }),
            not_full: Condvar::new(),
            not_empty: (0..nb_bike_types).map(|_| Condvar::new()).collect(),
        }
    }

    /// Stores a bike, waiting as long as the station is full.
    ///
    /// If the station is (or becomes, while waiting) shut down, the bike is not stored and is
    /// returned inside [StationClosed].
    pub fn put_bike(&self, bike: Bike) -> Result<(), StationClosed> {
        let mut state = self.state.lock();
        while !state.ending && state.current_count >= self.capacity {
            self.not_full.wait(&mut state);
        }

        if state.ending {
            return Err(StationClosed(bike));
        }

        let slot = state.insert(bike);
        self.not_empty[slot].notify_one();
        Ok(())
    }

    /// Takes the oldest bike of the given type, waiting as long as there is none.
    ///
    /// Returns `None` right away for an unknown bike type, and `None` once the station is shut down.
    pub fn get_bike(&self, bike_type: BikeType) -> Option<Bike> {
        let slot = bike_type.index();
        if slot >= self.not_empty.len() {
            return None;
        }

        let mut state = self.state.lock();
        while !state.ending && state.queues[slot].is_empty() {
            self.not_empty[slot].wait(&mut state);
        }

        if state.ending {
            return None;
        }

        let bike = state.queues[slot].pop_front()?;
        state.current_count -= 1;
        self.not_full.notify_one();
        Some(bike)
    }

    /// Stores as many of the given bikes as fit, in input order, without waiting.
    ///
    /// `None` entries are ignored. Bikes which could not be stored, because the station is full or
    /// shut down, are returned in their original order.
    pub fn add_bikes<I, B>(&self, bikes: I) -> Vec<Bike>
    where
        I: IntoIterator<Item = B>,
        B: Into<Option<Bike>>,
    {
        // materialize before locking, the caller's iterator must not run under our lock
        let bikes: Vec<Bike> = bikes
            .into_iter()
            .filter_map(Into::<Option<Bike>>::into)
            .collect();
        let mut rejected = Vec::new();

        let mut state = self.state.lock();
        for bike in bikes {
            if state.ending || state.current_count >= self.capacity {
                rejected.push(bike);
                continue;
            }
            let slot = state.insert(bike);
            self.not_empty[slot].notify_one();
        }

        trace!(
            rejected = rejected.len(),
            count = state.current_count,
            "add_bikes"
        );
        rejected
    }

    /// Takes up to `n` bikes without waiting.
    ///
    /// Bike types are visited in ascending order, and each type gives its oldest bikes first. The
    /// result is therefore grouped by type. Fewer than `n` bikes are returned if the station holds
    /// fewer.
    pub fn get_bikes(&self, n: usize) -> Vec<Bike> {
        let mut taken = Vec::new();

        let mut state = self.state.lock();
        for queue in state.queues.iter_mut() {
            let remaining = n - taken.len();
            if remaining == 0 {
                break;
            }
            let k = remaining.min(queue.len());
            taken.extend(queue.drain(..k));
        }
        state.current_count -= taken.len();

        if !taken.is_empty() {
            // several slots may have been freed at once
            self.not_full.notify_all();
        }
        trace!(taken = taken.len(), count = state.current_count, "get_bikes");
        taken
    }

    /// Removes every bike from the station.
    pub fn drain(&self) -> Vec<Bike> {
        self.get_bikes(usize::MAX)
    }

    pub fn count_bikes_of_type(&self, bike_type: BikeType) -> usize {
        if bike_type.index() >= self.not_empty.len() {
            return 0;
        }
        self.state.lock().queues[bike_type.index()].len()
    }

    pub fn nb_bikes(&self) -> usize {
        self.state.lock().current_count
    }

    pub fn nb_slots(&self) -> usize {
        self.capacity
    }

    pub fn nb_bike_types(&self) -> usize {
        self.not_empty.len()
    }

    pub fn is_ending(&self) -> bool {
        self.state.lock().ending
    }

    /// Shuts the station down and releases every thread blocked in [BikeStation::put_bike] or
    /// [BikeStation::get_bike]. Calling it again has no effect.
    pub fn ending(&self) {
        let mut state = self.state.lock();
        if state.ending {
            return;
        }
        state.ending = true;

        self.not_full.notify_all();
        for cv in &self.not_empty {
            cv.notify_all();
        }
    }
}

impl Drop for BikeStation {
    fn drop(&mut self) {
        self.ending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::bike::BikeFactory;
    use crate::simulation::id::BikeId;

    fn bike(id: u64, bike_type: usize) -> Bike {
        Bike::new(BikeId(id), BikeType(bike_type))
    }

    #[test]
    fn put_get_single_thread() {
        let station = BikeStation::new(10, 3);
        assert_eq!(station.nb_bikes(), 0);

        station.put_bike(bike(7, 0)).unwrap();
        assert_eq!(station.nb_bikes(), 1);
        assert_eq!(station.count_bikes_of_type(BikeType(0)), 1);

        let b = station.get_bike(BikeType(0)).unwrap();
        assert_eq!(b.id(), BikeId(7));
        assert_eq!(station.nb_bikes(), 0);
    }

    #[test]
    fn fifo_within_type() {
        let station = BikeStation::new(10, 2);
        station.put_bike(bike(1, 1)).unwrap();
        station.put_bike(bike(2, 0)).unwrap();
        station.put_bike(bike(3, 1)).unwrap();

        assert_eq!(station.get_bike(BikeType(1)).unwrap().id(), BikeId(1));
        assert_eq!(station.get_bike(BikeType(1)).unwrap().id(), BikeId(3));
        assert_eq!(station.get_bike(BikeType(0)).unwrap().id(), BikeId(2));
    }

    #[test]
    fn add_and_get_multiple() {
        let station = BikeStation::new(10, 3);
        let mut factory = BikeFactory::new();

        let rejected = station.add_bikes(factory.create_round_robin(5, 3));
        assert!(rejected.is_empty());
        assert_eq!(station.nb_bikes(), 5);

        let taken = station.get_bikes(3);
        assert_eq!(taken.len(), 3);
        assert_eq!(station.nb_bikes(), 2);
    }

    #[test]
    fn bulk_insert_respects_capacity() {
        let station = BikeStation::new(3, 1);
        let bikes: Vec<Bike> = (0..5).map(|i| bike(i, 0)).collect();

        let rejected = station.add_bikes(bikes);

        assert_eq!(station.nb_bikes(), 3);
        let rejected_ids: Vec<BikeId> = rejected.iter().map(Bike::id).collect();
        assert_eq!(rejected_ids, vec![BikeId(3), BikeId(4)]);
    }

    #[test]
    fn bulk_insert_skips_none_entries() {
        let station = BikeStation::new(2, 1);
        let bikes = vec![Some(bike(0, 0)), None, Some(bike(1, 0)), None, Some(bike(2, 0))];

        let rejected = station.add_bikes(bikes);

        assert_eq!(station.nb_bikes(), 2);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].id(), BikeId(2));
    }

    #[test]
    fn unknown_type_is_stored_as_type_zero() {
        let station = BikeStation::new(5, 2);
        station.put_bike(bike(0, 9)).unwrap();
        assert!(station.add_bikes(vec![bike(1, 2)]).is_empty());

        assert_eq!(station.count_bikes_of_type(BikeType(0)), 2);
        assert_eq!(station.count_bikes_of_type(BikeType(1)), 0);
        // the bike keeps its original tag
        assert_eq!(station.get_bike(BikeType(0)).unwrap().bike_type(), BikeType(9));
    }

    #[test]
    fn get_bike_with_unknown_type_does_not_block() {
        let station = BikeStation::new(5, 2);
        assert!(station.get_bike(BikeType(2)).is_none());

        station.put_bike(bike(0, 0)).unwrap();
        assert!(station.get_bike(BikeType(2)).is_none());
        assert_eq!(station.nb_bikes(), 1);
    }

    #[test]
    fn count_of_unknown_type_is_zero() {
        let station = BikeStation::new(5, 2);
        station.put_bike(bike(0, 0)).unwrap();
        assert_eq!(station.count_bikes_of_type(BikeType(5)), 0);
    }

    #[test]
    fn get_bikes_groups_by_type() {
        let station = BikeStation::new(10, 3);
        let bikes = vec![bike(0, 2), bike(1, 1), bike(2, 0), bike(3, 2), bike(4, 0)];
        assert!(station.add_bikes(bikes).is_empty());

        let ids: Vec<BikeId> = station.get_bikes(4).iter().map(Bike::id).collect();
        assert_eq!(ids, vec![BikeId(2), BikeId(4), BikeId(1), BikeId(0)]);
        assert_eq!(station.nb_bikes(), 1);
        assert_eq!(station.count_bikes_of_type(BikeType(2)), 1);
    }

    #[test]
    fn get_bikes_returns_what_exists() {
        let station = BikeStation::new(10, 3);
        assert!(station.get_bikes(4).is_empty());

        assert!(station.add_bikes(vec![bike(0, 1), bike(1, 2)]).is_empty());
        assert_eq!(station.get_bikes(10).len(), 2);
        assert_eq!(station.nb_bikes(), 0);
    }

    #[test]
    fn ending_is_idempotent() {
        let station = BikeStation::new(1, 1);
        station.ending();
        station.ending();
        assert!(station.is_ending());
    }

    #[test]
    fn put_after_ending_returns_bike() {
        let station = BikeStation::new(1, 1);
        station.ending();

        let err = station.put_bike(bike(4, 0)).unwrap_err();
        assert_eq!(err.into_bike().id(), BikeId(4));
        assert_eq!(station.nb_bikes(), 0);
    }

    #[test]
    fn bulk_insert_after_ending_rejects_everything() {
        let station = BikeStation::new(10, 1);
        station.ending();

        let rejected = station.add_bikes(vec![bike(0, 0), bike(1, 0)]);
        assert_eq!(rejected.len(), 2);
        assert_eq!(station.nb_bikes(), 0);
    }

    #[test]
    fn bulk_removal_still_works_after_ending() {
        let station = BikeStation::new(10, 1);
        assert!(station.add_bikes(vec![bike(0, 0), bike(1, 0)]).is_empty());
        station.ending();

        assert!(station.get_bike(BikeType(0)).is_none());
        assert_eq!(station.drain().len(), 2);
    }

    #[test]
    fn slots_are_fixed() {
        let station = BikeStation::new(4, 2);
        assert_eq!(station.nb_slots(), 4);
        assert_eq!(station.nb_bike_types(), 2);
    }
}
