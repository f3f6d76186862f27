pub mod bike;
pub mod config;
pub mod controller;
pub mod id;
pub mod logging;
pub mod observer;
pub mod random;
pub mod rider;
pub mod scenario;
pub mod station;
pub mod van;
