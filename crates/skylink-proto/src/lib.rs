pub mod authority;
pub mod command;
pub mod telemetry;
