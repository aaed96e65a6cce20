//! LmsComplete: course completion-API discovery, multi-protocol completion
//! drivers, verification, and exhaustive fallback.
//!
//! The library is written against the [`host`] traits, so the same
//! orchestrator runs over a live page (script host) or an in-memory graph.

pub mod commands;
pub mod config;
pub mod decision;
pub mod discovery;
pub mod drivers;
pub mod error;
pub mod host;
pub mod http;
pub mod orchestrator;
pub mod pipeline;
pub mod types;

pub use commands::{handle_command, handle_json, Command};
pub use config::CompletionConfig;
pub use decision::{DecisionCategory, DecisionLog, DecisionRecord};
pub use discovery::{ApiDiscovery, ApiRegistry, DiscoveredApi};
pub use drivers::{DriverSet, ProtocolDriver};
pub use error::{CommandError, ConfigError, DriverError, HostError};
pub use orchestrator::{CompletionOrchestrator, CompletionResult, KitchenSinkResult, Phase, PhaseRecord};
pub use pipeline::{FallbackPipeline, PipelineConfig, StepResult, StepStatus};
pub use types::*;
