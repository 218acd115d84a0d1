//! Machine-readable budget breakdown for the `/context` diagnostic.

use serde::Serialize;

use crate::blocks::Tier;

#[derive(Debug, Clone, Serialize)]
pub struct BlockReport {
    pub label: String,
    pub tier: Tier,
    pub tokens: usize,
    pub included: bool,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetReport {
    pub total_budget: usize,
    pub response_reserve: usize,
    pub conversation_tokens: usize,
    pub system_budget: usize,
    pub system_tokens: usize,
    pub blocks: Vec<BlockReport>,
}

impl BudgetReport {
    /// Human-readable rendering for the CLI.
    pub fn render_text(&self) -> String {
        let mut out = format!(
            "budget: {} total, {} reserve, {} conversation, {} system ({} used)\n",
            self.total_budget,
            self.response_reserve,
            self.conversation_tokens,
            self.system_budget,
            self.system_tokens,
        );
        for b in &self.blocks {
            out.push_str(&format!(
                "  [{:?}] {:<18} {:>6} tokens{}{}\n",
                b.tier,
                b.label,
                b.tokens,
                if b.truncated { "  (truncated)" } else { "" },
                if b.included { "" } else { "  (dropped)" },
            ));
        }
        out
    }
}
