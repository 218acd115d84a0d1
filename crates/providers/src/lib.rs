//! Unified LLM chat interface across back-ends, with tier-based model
//! selection and tool-call normalization.

pub mod anthropic;
pub mod normalize;
pub mod openai_compat;
pub mod registry;
pub mod scripted;
pub mod traits;
pub mod util;

pub use registry::{ProviderInitError, ProviderRegistry};
pub use scripted::{ScriptedProvider, Step};
pub use traits::{ChatRequest, ChatResponse, LlmProvider};
