mod client;
mod config;
mod tracker_repository;

pub use client::*;
pub use config::*;
pub use tracker_repository::*;
