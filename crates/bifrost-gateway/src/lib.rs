//! Bifrost: a dynamic HTTP gateway.
//!
//! Virtual routes are registered at runtime through the `/bifrost/` management
//! API. Invoking one renders its target templates against the request payload
//! and fans the calls out concurrently, answering with a map of outcomes.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod server;
pub mod template;

pub use config::GatewayConfig;
pub use dispatch::{FanOut, FanOutReport, TargetClient, TargetOutcome};
pub use error::GatewayError;
pub use registry::{RegistryKey, RouteDefinition, RouteRegistry, TargetTemplate};
pub use server::{router, run, serve, GatewayState};
