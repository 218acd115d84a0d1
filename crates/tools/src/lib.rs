//! Tool / skill registry — pluggable capabilities with parameter
//! schemas, direct-dispatch fallback, and markdown-defined skills.

pub mod builtin;
pub mod registry;
pub mod skills;

pub use builtin::register_builtins;
pub use registry::{FnHandler, ToolHandler, ToolOutcome, ToolRegistry};
pub use skills::{load_skill, register_skills, render_catalog, scan_skills, Skill, SkillManifest};
