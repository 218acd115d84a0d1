//! Markdown-defined skills.
//!
//! A skill directory `<name>/SKILL.md` carries YAML frontmatter
//! `{name, description, tools, triggers, priority}` followed by a
//! markdown body. Loading produces a tool descriptor whose handler
//! expands the body as an LLM system prompt with the named tools
//! pre-filtered into the request.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use osa_domain::config::ModelTier;
use osa_domain::error::{Error, Result};
use osa_domain::message::{Message, ToolDefinition};
use osa_providers::{ChatRequest, ProviderRegistry};

use crate::registry::{ToolHandler, ToolRegistry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manifest
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct SkillManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Tools this skill may use, pre-filtered into its provider call.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone)]
pub struct Skill {
    pub manifest: SkillManifest,
    pub body: String,
}

/// Split YAML frontmatter (between `---` fences) from the markdown body.
pub fn parse_frontmatter(content: &str) -> Option<(SkillManifest, String)> {
    let rest = content.strip_prefix("---")?;
    let end = rest.find("\n---")?;
    let yaml = &rest[..end];
    let body = rest[end + 4..].trim_start().to_owned();
    let manifest: SkillManifest = serde_yaml::from_str(yaml).ok()?;
    Some((manifest, body))
}

/// Load one skill from `<dir>/SKILL.md`.
pub fn load_skill(skill_dir: &Path) -> Result<Option<Skill>> {
    let md_path = skill_dir.join("SKILL.md");
    if !md_path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&md_path)?;
    match parse_frontmatter(&content) {
        Some((manifest, body)) => Ok(Some(Skill { manifest, body })),
        None => Err(Error::Config(format!(
            "{}: missing or invalid frontmatter",
            md_path.display()
        ))),
    }
}

/// Scan a skills root directory. Invalid skill dirs are skipped with a
/// warning. Results are sorted by descending priority, then name.
pub fn scan_skills(skills_root: &Path) -> Vec<Skill> {
    let mut skills = Vec::new();
    let read_dir = match std::fs::read_dir(skills_root) {
        Ok(rd) => rd,
        Err(_) => return skills,
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match load_skill(&path) {
            Ok(Some(skill)) => skills.push(skill),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(skill_dir = %path.display(), error = %e, "skipping skill directory");
            }
        }
    }
    skills.sort_by(|a, b| {
        b.manifest
            .priority
            .cmp(&a.manifest.priority)
            .then(a.manifest.name.cmp(&b.manifest.name))
    });
    skills
}

/// One-line-per-skill catalog for the context assembler.
pub fn render_catalog(skills: &[Skill]) -> String {
    skills
        .iter()
        .map(|s| {
            format!(
                "- {}: {} (tools: {})",
                s.manifest.name,
                s.manifest.description,
                if s.manifest.tools.is_empty() {
                    "none".to_owned()
                } else {
                    s.manifest.tools.join(", ")
                }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Executes a markdown skill: one utility-tier provider call with the
/// skill body as the system prompt and the named tools attached.
struct MarkdownSkillHandler {
    body: String,
    tool_defs: Vec<ToolDefinition>,
    providers: Arc<ProviderRegistry>,
}

#[async_trait::async_trait]
impl ToolHandler for MarkdownSkillHandler {
    async fn run(&self, args: Value) -> Result<String> {
        let input = args
            .get("input")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidRequest("missing required argument: input".into()))?;

        let req = ChatRequest {
            messages: vec![Message::system(&self.body), Message::user(input)],
            tools: self.tool_defs.clone(),
            temperature: Some(0.3),
            ..Default::default()
        };
        let resp = self.providers.chat_tier(ModelTier::Utility, req).await?;

        // A skill sub-call is single-shot; any tool calls the model
        // emitted are rendered back as text for the outer loop to act on.
        if resp.tool_calls.is_empty() {
            Ok(resp.content)
        } else {
            let calls = serde_json::to_string(&resp.tool_calls)?;
            Ok(format!("{}\n[requested tool calls: {calls}]", resp.content))
        }
    }
}

/// Register every skill found under `skills_root` as a tool.
/// Tool definitions for the skill's named tools are snapshotted at load
/// time, so builtins must be registered first.
pub fn register_skills(
    registry: &ToolRegistry,
    providers: Arc<ProviderRegistry>,
    skills_root: &Path,
) -> Vec<Skill> {
    let skills = scan_skills(skills_root);
    for skill in &skills {
        let tool_defs = registry.filtered_tools(&skill.manifest.tools);
        registry.register(
            ToolDefinition {
                name: skill.manifest.name.clone(),
                description: skill.manifest.description.clone(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "input": {"type": "string", "description": "Task for this skill"}
                    },
                    "required": ["input"]
                }),
            },
            Arc::new(MarkdownSkillHandler {
                body: skill.body.clone(),
                tool_defs,
                providers: providers.clone(),
            }),
        );
        tracing::info!(skill = %skill.manifest.name, "registered markdown skill");
    }
    skills
}
