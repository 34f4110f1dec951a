//! Carnet — streaming tool-call orchestration for conversational LLM sessions.
//!
//! A session streams model output to the caller while executing the tool
//! calls the model requests, round after round, under a round budget and a
//! single wall-clock deadline.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use carnet::prelude::*;
//! use futures::StreamExt;
//!
//! # async fn example() -> carnet::error::Result<()> {
//! let config = CarnetConfig::load(None)?;
//! let registry = Arc::new(
//!     ToolRegistry::builder()
//!         .tool(carnet::tools::builtin::current_datetime_tool())
//!         .build(),
//! );
//! let backend = Arc::new(OpenAiCompatibleBackend::new(config.backend));
//! let orchestrator = StreamOrchestrator::new(backend, registry.clone(), config.orchestrator);
//!
//! let request = StreamRequest::from_registry(vec![Message::user("What day is it?")], &registry);
//! let mut events = orchestrator.stream(request);
//! while let Some(event) = events.next().await {
//!     print!("{}", event.to_ndjson()?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod prelude;
pub mod provider;
pub mod store;
pub mod tools;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;
