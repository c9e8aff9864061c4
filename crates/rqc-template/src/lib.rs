//! Workflow templates: authoring documents, normalization into an indexed
//! model, the built-in registry and the stored → builtin → synthesized
//! resolution chain.

pub mod doc;
pub mod registry;
pub mod resolve;
pub mod synth;
pub mod template;

pub use doc::*;
pub use registry::*;
pub use resolve::*;
pub use synth::*;
pub use template::*;
