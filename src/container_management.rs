//! Container management subsystem.
//!
//! This module owns the single named notebook server container: input
//! validation, the start/stop lifecycle, classification of failed starts, and
//! lookup of which image tags are available locally.
//!
//! Re-exports:
//! - [`ContainerController`]: main entry point to start/stop/inspect the server.
//! - [`newest_local_tag`]: local image lookup.
//! - [`ContainerStatus`], [`StartRequest`]: core types.
//!
//! Example (non-running):
//! ```ignore
//! use labs_launcher::configuration::LaunchConfig;
//! use labs_launcher::container_management::{ContainerController, StartRequest};
//! use labs_launcher::engine::DockerEngine;
//! use std::sync::Arc;
//!
//! let config = LaunchConfig::default();
//! let controller = ContainerController::new(Arc::new(DockerEngine::connect()?), &config);
//! let request = StartRequest::new(&config.data_mount, &config.token, config.port);
//! let status = controller.start("v1.0.0", &request).await?;
//! println!("server is {}", status);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod controller;
#[cfg(test)]
pub mod integration_tests;
pub mod locator;
pub mod types;
pub mod validation;

pub use controller::ContainerController;
pub use locator::newest_local_tag;
pub use types::{ContainerStatus, StartRequest};
