mod device;
mod envelope;
mod eui;
mod result;
mod telemetry_message;
mod tracker_repository;

pub use device::*;
pub use envelope::*;
pub use eui::*;
pub use result::*;
pub use telemetry_message::*;
pub use tracker_repository::*;
