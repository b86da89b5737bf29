pub mod id;
pub mod telemetry;

pub use id::*;
pub use telemetry::*;
