//! Options contract exploration engine.
//!
//! Two-phase, cache-aware exploration of option chains for candidate
//! strategies, followed by shape-aware strike selection, liquidity
//! grading and PCS scoring. `PipelineOrchestrator` drives a batch end to
//! end and hands each scored record to the theory validator.

pub mod cache;
pub mod deep;
pub mod greeks;
pub mod liquidity;
pub mod pipeline;
pub mod sampler;
pub mod scoring;
pub mod selector;

#[cfg(test)]
mod testing;

pub use cache::{CacheStats, ChainCache};
pub use deep::DeepExplorer;
pub use liquidity::{LiquidityGrader, LiquidityThresholds, TimeTier};
pub use pipeline::{PipelineOrchestrator, RunSummary};
pub use sampler::SampledExplorer;
pub use scoring::PcsScorer;
pub use selector::{ChainView, SelectionFailure, StrikeSelector};
