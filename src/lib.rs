pub mod configuration;
pub mod container_management;
pub mod engine;
pub mod error_handling;
pub mod image_pull;
pub mod launcher;
pub mod observable;
pub mod registry;
pub mod status_poller;
pub mod telemetry;
pub mod web_interface;

pub use launcher::Launcher;
