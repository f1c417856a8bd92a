//! gpulet-core: Core types for the gpulet scheduling engine
//!
//! This crate provides the fundamental types used throughout the gpulet system:
//! - Job specifications and status lifecycle
//! - Resource vectors and component-wise capacity arithmetic
//! - Node and pod snapshot types
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod job;
pub mod node;
pub mod resources;

pub use config::*;
pub use error::*;
pub use job::*;
pub use node::*;
pub use resources::*;
