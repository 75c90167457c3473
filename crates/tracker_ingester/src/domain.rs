mod cayenne_lpp;
mod device_registry;
mod device_search;
mod lpp_tracker_parser;
mod telemetry_parser;
mod write_queue;

pub use cayenne_lpp::*;
pub use device_registry::*;
pub use device_search::*;
pub use lpp_tracker_parser::*;
pub use telemetry_parser::*;
pub use write_queue::*;
