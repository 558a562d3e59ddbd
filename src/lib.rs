// ABOUTME: Root library module exposing the relay, skills, connectors, and HTTP surface
// ABOUTME: Re-exports the platform-agnostic husk-core modules for convenience

pub mod connector;
pub mod relay;
pub mod server;
pub mod skills;

// Re-export platform-agnostic modules from husk-core
pub use husk_core::audit;
pub use husk_core::config;
pub use husk_core::health;
pub use husk_core::metrics;
pub use husk_core::traits;

pub use relay::{Relay, RelayBuilder};
