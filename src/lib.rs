#![forbid(unsafe_code)]

//! # geoscope
//!
//! How visible is a brand in AI-generated answers, and why?
//!
//! geoscope fans many query variations out to external answer engines under a
//! bounded worker pool, extracts structured brand/competitor mention
//! observations from each answer, aggregates them into visibility scores and
//! a competitive comparison, and asks a reasoning model to explain the
//! picture (hypotheses) and improve it (recommendations). A quality gate
//! critiques every generated artifact and regenerates the weak hypotheses
//! before the run is finalized.
//!
//! Every external call and derived decision is reconstructable from the
//! result's reasoning trace; partial upstream failure degrades the run
//! instead of aborting it.

pub mod evaluate;
pub mod extract;
pub mod gateway;
pub mod generate;
pub mod history;
pub mod model;
pub mod orchestrator;
pub mod plan;
pub mod prompts;
pub mod scoring;
pub mod state;

pub use gateway::{
    ChatProvider, GatewayConfig, InferenceGateway, OpenAiAdapter, PerplexityAdapter,
    ProviderError, SearchProvider,
};
pub use history::{HistoryStore, SqliteHistoryStore};
pub use model::{AnalysisRequest, AnalysisResult, Platform, RunStatus};
pub use orchestrator::{Orchestrator, OrchestratorError, COLLECT_CONCURRENCY};
