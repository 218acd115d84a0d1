//! Shared domain types for the OSA runtime: the error type, configuration,
//! the provider-agnostic message model, and the signal 5-tuple.

pub mod config;
pub mod error;
pub mod message;
pub mod signal;

pub use error::{Error, Result};
pub use message::{Message, Role, ToolCall, ToolDefinition, Usage};
pub use signal::{ChannelKind, Confidence, Genre, Mode, MsgFormat, MsgType, Signal};
