mod uplink_processor;

pub use uplink_processor::*;
