// src/lib.rs
pub mod bridge;
pub mod broker;
pub mod cli;
pub mod decode;
pub mod gateway;
pub mod handler;
pub mod livetail;
pub mod native;
pub mod pipeline;
pub mod point;
pub mod relay;

// Re-export tracing for use in other modules
pub use tracing;

pub use native::build_router;
