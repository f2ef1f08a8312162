//! QueryForge guard: everything between raw model output and a query that is
//! safe to hand back to a caller
//!
//! - [`extract`] pulls the candidate query out of free-form text
//! - [`validate`] classifies it without executing it
//! - [`apply_limit`] bounds reads that would return unbounded rows

pub mod extract;
pub mod lexer;
pub mod limit;
pub mod validate;

pub use extract::{extract, extract_with, Extracted, ExtractionError};
pub use limit::{apply_limit, EnforcementError, RowLimitEnforcer};
pub use validate::{validate, Access, MatchedRule, SafetyValidator, ValidationVerdict};
