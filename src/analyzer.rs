//! Content analyzers bound to registered payload types

use std::sync::Arc;

use crate::{
    data::DataSchema,
    payload::{AnalysisContext, AnalyzerState, PayloadView},
};

/// Verdict of one analysis attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOutcome {
    /// Not enough bytes yet, call again with more
    NeedMore,
    /// The content matches the type
    Accepted,
    /// The content is not of this type. Not an error.
    Rejected,
    /// The content is broken, the payload goes into error
    Error,
}

/// Incremental classifier for one payload type.
///
/// `analyze` sees the whole buffered body on each call, not just the latest
/// chunk. Per-payload state goes in [`AnalysisContext::state`] and is
/// handed back to `cleanup` once the analyzer is done with the payload.
pub trait Analyzer: Send + Sync {
    /// Fields of the record allocated for each analyzed payload
    fn schema(&self) -> Option<Arc<DataSchema>> {
        None
    }

    fn analyze(&self, ctx: &mut AnalysisContext<'_>, data: &[u8]) -> AnalysisOutcome;

    fn cleanup(&self, _pload: &PayloadView<'_>, _state: AnalyzerState) {}
}
