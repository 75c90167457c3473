pub mod domain;
pub mod nats;
pub mod tracker_ingester;

pub use domain::*;
pub use nats::*;
pub use tracker_ingester::*;
