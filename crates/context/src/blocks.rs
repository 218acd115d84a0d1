//! Context blocks and the signal overlay.
//!
//! Each block carries a tier; the assembler fits them against the budget
//! in tier order. Tier 1 is always included in full.

use osa_domain::signal::{Mode, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Always included in full.
    Critical,
    /// Capped at `tier2_budget_pct` of the system budget.
    High,
    /// Capped at `tier3_budget_pct` of the system budget.
    Medium,
    /// Receives whatever remains (floor 0).
    Low,
}

#[derive(Debug, Clone)]
pub struct ContextBlock {
    pub tier: Tier,
    pub label: &'static str,
    pub content: String,
}

impl ContextBlock {
    pub fn new(tier: Tier, label: &'static str, content: impl Into<String>) -> Self {
        Self {
            tier,
            label,
            content: content.into(),
        }
    }
}

/// Runtime facts injected into Tier 1 — timestamp, channel, session,
/// host environment, active provider/model.
#[derive(Debug, Clone, Default)]
pub struct RuntimeInfo {
    pub session_id: String,
    pub channel: String,
    pub cwd: String,
    pub os: String,
    pub provider: String,
    pub model: String,
    /// Pre-computed git summary (branch, modified files, recent commits).
    /// Empty when not in a repository.
    pub git_summary: String,
}

impl RuntimeInfo {
    pub fn render(&self) -> String {
        let mut out = format!(
            "# Runtime\ntime: {}\nchannel: {}\nsession: {}\ncwd: {}\nos: {}\nprovider: {} ({})",
            chrono::Utc::now().to_rfc3339(),
            self.channel,
            self.session_id,
            self.cwd,
            self.os,
            self.provider,
            self.model,
        );
        if !self.git_summary.is_empty() {
            out.push_str("\ngit: ");
            out.push_str(&self.git_summary);
        }
        out
    }
}

/// Render the signal overlay — per-mode and per-weight guidance plus the
/// standing response rules. Always Tier 1.
pub fn render_signal_overlay(signal: &Signal) -> String {
    let mode_directive = match signal.mode {
        Mode::Execute => "Be concise and action-oriented.",
        Mode::Analyze => "Be thorough and show your reasoning.",
        Mode::Build => "Produce artifacts.",
        Mode::Assist => "Explain.",
        Mode::Maintain => "Diagnose and fix.",
    };

    let weight_directive = if signal.weight >= 0.8 {
        "This message is highest priority; give it full attention."
    } else if signal.weight < 0.4 {
        "Give a brief response."
    } else {
        ""
    };

    let mut out = format!(
        "# Signal\nmode={:?} genre={:?} type={:?} weight={:.2}\n{mode_directive}",
        signal.mode, signal.genre, signal.msg_type, signal.weight
    );
    if !weight_directive.is_empty() {
        out.push('\n');
        out.push_str(weight_directive);
    }
    out.push_str(
        "\n\nRules:\n\
         - Answer directly; no preamble.\n\
         - Keep simple answers under 4 lines.\n\
         - Use the dedicated tools, not shell equivalents.\n\
         - Do not add features beyond what was asked.",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use osa_domain::signal::ChannelKind;

    fn signal(mode: Mode, weight: f64) -> Signal {
        let mut s = Signal::fallback("x", ChannelKind::Cli);
        s.mode = mode;
        s.weight = weight;
        s
    }

    #[test]
    fn mode_directives_differ() {
        let exec = render_signal_overlay(&signal(Mode::Execute, 0.5));
        let analyze = render_signal_overlay(&signal(Mode::Analyze, 0.5));
        assert!(exec.contains("action-oriented"));
        assert!(analyze.contains("reasoning"));
    }

    #[test]
    fn weight_bands_change_guidance() {
        assert!(render_signal_overlay(&signal(Mode::Assist, 0.9)).contains("highest priority"));
        assert!(render_signal_overlay(&signal(Mode::Assist, 0.3)).contains("brief response"));
        let mid = render_signal_overlay(&signal(Mode::Assist, 0.5));
        assert!(!mid.contains("highest priority"));
        assert!(!mid.contains("brief response"));
    }

    #[test]
    fn standing_rules_are_always_present() {
        let out = render_signal_overlay(&signal(Mode::Build, 0.6));
        assert!(out.contains("no preamble"));
        assert!(out.contains("under 4 lines"));
        assert!(out.contains("dedicated tools"));
        assert!(out.contains("beyond what was asked"));
    }

    #[test]
    fn runtime_block_includes_environment() {
        let info = RuntimeInfo {
            session_id: "s1".into(),
            channel: "cli".into(),
            cwd: "/work".into(),
            os: "linux".into(),
            provider: "local".into(),
            model: "m".into(),
            git_summary: "main, 2 modified".into(),
        };
        let out = info.render();
        assert!(out.contains("session: s1"));
        assert!(out.contains("git: main"));
    }
}
