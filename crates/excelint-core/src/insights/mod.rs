//! Non-error insights: optimization advice and user work patterns.

mod optimization;
mod patterns;

pub use optimization::{OptimizationAdvisor, OptimizationSuggestion, OptimizationSummary, OptimizationType};
pub use patterns::{ActionType, PatternAnalyzer, PatternInsights, PatternType, UserAction, WorkPattern};
