// src/pipeline/mod.rs
pub mod influx;
mod line_protocol;
pub mod memory;
pub mod query;
pub mod retry;
pub mod sink;

pub use influx::{InfluxConfig, InfluxSink};
pub use memory::MemorySink;
pub use query::{FluxQuery, Predicate};
pub use sink::{FluxRecord, SinkError, TimeSeriesSink};
