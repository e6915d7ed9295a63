//! # Entity Search
//!
//! Two ways of mapping user language onto stored entities:
//!
//! - [`EntityResolver`]: one reference, one answer. Returns the best match
//!   with a confidence plus any near ties worth confirming.
//! - [`HybridSearch`]: a ranked list for browsing, fusing vector and fuzzy
//!   text retrieval.
//!
//! Both need the embedding provider (text-only search aside). When it fails
//! the call returns [`MemoryError::UpstreamUnavailable`](crate::error::MemoryError)
//! instead of an empty result, so callers can tell "nothing matched" from
//! "could not search".

mod hybrid;
mod resolver;
pub mod similarity;

pub use hybrid::{HybridSearch, LatencyBreakdown, SearchHit, SearchMode, SearchResponse};
pub use resolver::{EntityCandidate, EntityResolver, MatchResult, ResolveRequest, ScopeHint};
