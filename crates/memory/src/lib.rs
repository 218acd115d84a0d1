//! Memory / session store — append-only per-session transcripts,
//! long-term markdown notes, and a best-effort episodic index.

pub mod episodic;
pub mod longterm;
pub mod transcript;

pub use episodic::EpisodicIndex;
pub use longterm::LongTermMemory;
pub use transcript::{TranscriptLine, TranscriptStore};
