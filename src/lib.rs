#[macro_use]
extern crate log;

pub mod admission;
pub mod auth;
pub mod availability;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod occupancy;
pub mod store;
