//! Shared types for the blocklist organizer: rule groups, upstream rule
//! sources, build results, checksums and environment configuration.

pub mod checksum;
pub mod config;
pub mod error;
pub mod group;
pub mod source;

pub use checksum::buffer_checksum;
pub use config::Config;
pub use error::*;
pub use group::*;
pub use source::*;
