//! The context assembler — tiered, token-budgeted system prompt
//! construction.
//!
//! Given the gathered blocks and the conversation, produce a single
//! system message prefix such that
//! `estimate(system) + estimate(history) + response_reserve ≤ budget`,
//! or the prefix carries at least one `[...truncated...]` marker.

use osa_domain::config::ContextConfig;
use osa_domain::message::Message;
use osa_domain::signal::Signal;

use crate::blocks::{render_signal_overlay, ContextBlock, RuntimeInfo, Tier};
use crate::estimate::{estimate_tokens, estimate_tokens_messages, truncate_to_tokens};
use crate::report::{BlockReport, BudgetReport};

/// The system budget never shrinks below this, even under extreme
/// conversation pressure — Tier 1 must always fit something.
const MIN_SYSTEM_BUDGET: usize = 2000;

/// Blocks cheaper than this are dropped rather than truncated into
/// uselessness.
const MIN_BLOCK_BUDGET: usize = 16;

const SEPARATOR: &str = "\n\n";

/// Everything the assembler needs besides config: the gathered content
/// of each source, already read from its store.
#[derive(Debug, Clone, Default)]
pub struct ContextSources {
    /// Identity + soul (Tier 1).
    pub identity: String,
    pub runtime: RuntimeInfo,
    /// Active skills catalog (Tier 2).
    pub skills_catalog: Option<String>,
    /// Relevance-filtered long-term memory snippets (Tier 2).
    pub memory_snippets: Vec<(String, String)>,
    /// Active workflow state (Tier 2).
    pub workflow_state: Option<String>,
    /// User profile (Tier 3).
    pub user_profile: Option<String>,
    /// Communication-style profile (Tier 3).
    pub style_profile: Option<String>,
    /// Memory-synthesis bulletin (Tier 3).
    pub bulletin: Option<String>,
    /// OS templates (Tier 4).
    pub os_templates: Option<String>,
    /// Per-machine addendums (Tier 4).
    pub machine_addendum: Option<String>,
}

pub struct ContextAssembler {
    config: ContextConfig,
}

struct FittedBlock {
    block: ContextBlock,
    content: String,
    tokens: usize,
    included: bool,
    truncated: bool,
}

impl ContextAssembler {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Assemble the full message list: `[system, ...conversation]`.
    pub fn build(
        &self,
        sources: &ContextSources,
        signal: &Signal,
        conversation: &[Message],
    ) -> Vec<Message> {
        let (fitted, _) = self.fit(sources, signal, conversation);
        let system = join_blocks(&fitted);
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(Message::system(system));
        messages.extend(conversation.iter().cloned());
        messages
    }

    /// Block-level budget breakdown for diagnostics (`/context`). Not
    /// for the hot path — it re-renders every block.
    pub fn token_budget(
        &self,
        sources: &ContextSources,
        signal: &Signal,
        conversation: &[Message],
    ) -> BudgetReport {
        let (fitted, system_budget) = self.fit(sources, signal, conversation);
        let system_tokens = estimate_tokens(&join_blocks(&fitted));
        BudgetReport {
            total_budget: self.config.max_context_tokens,
            response_reserve: self.config.response_reserve,
            conversation_tokens: estimate_tokens_messages(conversation),
            system_budget,
            system_tokens,
            blocks: fitted
                .iter()
                .map(|f| BlockReport {
                    label: f.block.label.to_owned(),
                    tier: f.block.tier,
                    tokens: f.tokens,
                    included: f.included,
                    truncated: f.truncated,
                })
                .collect(),
        }
    }

    // ── Core fitting ───────────────────────────────────────────────

    fn gather(&self, sources: &ContextSources, signal: &Signal) -> Vec<ContextBlock> {
        let mut blocks = Vec::new();

        // Tier 1 — identity + soul, signal overlay, runtime.
        blocks.push(ContextBlock::new(Tier::Critical, "identity", sources.identity.clone()));
        blocks.push(ContextBlock::new(
            Tier::Critical,
            "signal_overlay",
            render_signal_overlay(signal),
        ));
        blocks.push(ContextBlock::new(
            Tier::Critical,
            "runtime",
            sources.runtime.render(),
        ));

        // Tier 2 — skills, relevant memory, workflow state.
        if let Some(ref catalog) = sources.skills_catalog {
            blocks.push(ContextBlock::new(Tier::High, "skills", catalog.clone()));
        }
        if !sources.memory_snippets.is_empty() {
            let rendered = sources
                .memory_snippets
                .iter()
                .map(|(name, body)| format!("## {name}\n{body}"))
                .collect::<Vec<_>>()
                .join("\n");
            blocks.push(ContextBlock::new(Tier::High, "memory", rendered));
        }
        if let Some(ref wf) = sources.workflow_state {
            blocks.push(ContextBlock::new(Tier::High, "workflow", wf.clone()));
        }

        // Tier 3 — profiles + bulletin.
        if let Some(ref p) = sources.user_profile {
            blocks.push(ContextBlock::new(Tier::Medium, "user_profile", p.clone()));
        }
        if let Some(ref p) = sources.style_profile {
            blocks.push(ContextBlock::new(Tier::Medium, "style_profile", p.clone()));
        }
        if let Some(ref b) = sources.bulletin {
            blocks.push(ContextBlock::new(Tier::Medium, "bulletin", b.clone()));
        }

        // Tier 4 — OS templates, machine addendums.
        if let Some(ref t) = sources.os_templates {
            blocks.push(ContextBlock::new(Tier::Low, "os_templates", t.clone()));
        }
        if let Some(ref a) = sources.machine_addendum {
            blocks.push(ContextBlock::new(Tier::Low, "machine_addendum", a.clone()));
        }

        blocks
    }

    fn fit(
        &self,
        sources: &ContextSources,
        signal: &Signal,
        conversation: &[Message],
    ) -> (Vec<FittedBlock>, usize) {
        let blocks = self.gather(sources, signal);

        let conversation_tokens = estimate_tokens_messages(conversation);
        let system_budget = self
            .config
            .max_context_tokens
            .saturating_sub(self.config.response_reserve)
            .saturating_sub(conversation_tokens)
            .max(MIN_SYSTEM_BUDGET);

        // Tier 1 is unconditional; its cost comes off the top.
        let tier1_cost: usize = blocks
            .iter()
            .filter(|b| b.tier == Tier::Critical)
            .map(|b| estimate_tokens(&b.content))
            .sum();
        let mut remaining = system_budget.saturating_sub(tier1_cost);

        let tier2_cap = (system_budget as f64 * self.config.tier2_budget_pct) as usize;
        let tier3_cap = (system_budget as f64 * self.config.tier3_budget_pct) as usize;

        let mut fitted = Vec::with_capacity(blocks.len());
        let mut tier2_left = tier2_cap.min(remaining);
        // Tier caps are computed against the full system budget but each
        // tier can only spend what earlier tiers left behind.
        let mut tier3_left = tier3_cap;

        for block in blocks {
            match block.tier {
                Tier::Critical => {
                    let tokens = estimate_tokens(&block.content);
                    fitted.push(FittedBlock {
                        content: block.content.clone(),
                        tokens,
                        included: true,
                        truncated: false,
                        block,
                    });
                }
                Tier::High => {
                    let f = fit_block(block, &mut tier2_left, &mut remaining);
                    fitted.push(f);
                }
                Tier::Medium => {
                    tier3_left = tier3_left.min(remaining);
                    let f = fit_block(block, &mut tier3_left, &mut remaining);
                    fitted.push(f);
                }
                Tier::Low => {
                    // Residual, floored at zero.
                    let mut tier4_left = remaining;
                    let f = fit_block(block, &mut tier4_left, &mut remaining);
                    fitted.push(f);
                }
            }
        }

        (fitted, system_budget)
    }
}

fn fit_block(
    block: ContextBlock,
    tier_left: &mut usize,
    remaining: &mut usize,
) -> FittedBlock {
    let budget = (*tier_left).min(*remaining);
    let cost = estimate_tokens(&block.content);

    if budget < MIN_BLOCK_BUDGET {
        return FittedBlock {
            content: String::new(),
            tokens: 0,
            included: false,
            truncated: false,
            block,
        };
    }

    if cost <= budget {
        *tier_left -= cost;
        *remaining = remaining.saturating_sub(cost);
        return FittedBlock {
            content: block.content.clone(),
            tokens: cost,
            included: true,
            truncated: false,
            block,
        };
    }

    let (truncated_content, _) = truncate_to_tokens(&block.content, budget);
    let actual = estimate_tokens(&truncated_content);
    *tier_left = tier_left.saturating_sub(actual);
    *remaining = remaining.saturating_sub(actual);
    FittedBlock {
        content: truncated_content,
        tokens: actual,
        included: true,
        truncated: true,
        block,
    }
}

fn join_blocks(fitted: &[FittedBlock]) -> String {
    fitted
        .iter()
        .filter(|f| f.included && !f.content.is_empty())
        .map(|f| f.content.as_str())
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}
