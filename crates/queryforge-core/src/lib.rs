//! QueryForge core: turns a question and a schema into a validated query
//!
//! The model sits behind [`GenerationClient`]; everything it returns is
//! extracted, validated and bounded by `queryforge-guard` before a caller sees
//! it.

pub mod client;
pub mod error;
pub mod pipeline;
pub mod prompt;
pub mod request;

pub use client::{GenerationClient, GenerationError};
pub use error::{PipelineError, ValidationRejection};
pub use pipeline::{
    GenerationOptions, GenerationResult, GeneratorSettings, QueryGenerator, DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT,
};
pub use prompt::{build_prompt, build_prompt_for, build_prompt_with_limit, Prompt};
pub use queryforge_guard::Access;
pub use request::{GenerationRequest, RequestError};
