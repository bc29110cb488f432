pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod render;
pub mod server;

pub use error::{PipelineError, Result};
pub use pipeline::{HarvestOutcome, HarvestRequest, Pipeline};
pub use registry::{ProfileRegistry, RegistryHandle};
