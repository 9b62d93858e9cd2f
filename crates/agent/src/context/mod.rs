//! Turn context: where memory blocks come from and how they get in.
//!
//! | Stage | Type | Failure mode |
//! |-------|------|--------------|
//! | Retrieval | [`ContextService`] | Tier fallback, then empty |
//! | Quality | [`RelevanceValidator`] | Low-relevance blocks dropped |
//! | Injection | [`ContextInjectionService`] | Never fails; budgeted |

pub mod injection;
pub mod quality;
pub mod retrieval;

pub use injection::{ContextInjectionService, InjectionReport, extract_content};
pub use quality::{QualityMetrics, RelevanceValidator};
pub use retrieval::{ContextService, EnhancedContext};
