//! Opaque collaborators handed to agents through the run context.
//!
//! The pipeline never inspects what these return; it only threads them
//! through. Each seam is a trait so runs can swap in real backends.

pub mod composer;
pub mod generator;
pub mod retriever;

pub use composer::{PromptComposer, PromptFields, TemplateComposer};
pub use generator::{DeterministicGenerator, Generator};
pub use retriever::{KeywordRetriever, Retriever, Snippet};
