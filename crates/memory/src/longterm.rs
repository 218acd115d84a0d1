//! Long-term memory — a single markdown file of categorized notes.
//!
//! `remember` appends a dated bullet under a `## <category>` heading;
//! `recall` returns the whole document. The context assembler filters
//! relevance through the episodic index, not here.

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;

use osa_domain::error::{Error, Result};

pub struct LongTermMemory {
    path: PathBuf,
    /// Serializes read-modify-write cycles from concurrent tools.
    write_lock: Mutex<()>,
}

impl LongTermMemory {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Append a note under the category's heading, creating the heading
    /// at the end of the file if it does not exist yet.
    pub fn remember(&self, text: &str, category: &str) -> Result<()> {
        let _guard = self.write_lock.lock();

        let mut doc = if self.path.exists() {
            std::fs::read_to_string(&self.path).map_err(Error::Io)?
        } else {
            String::new()
        };

        let heading = format!("## {}", category.trim());
        let entry = format!("- [{}] {}\n", Utc::now().format("%Y-%m-%d"), text.trim());

        match find_section(&doc, &heading) {
            Some((_, end)) => {
                doc.insert_str(end, &entry);
            }
            None => {
                if !doc.is_empty() && !doc.ends_with('\n') {
                    doc.push('\n');
                }
                if !doc.is_empty() {
                    doc.push('\n');
                }
                doc.push_str(&heading);
                doc.push('\n');
                doc.push_str(&entry);
            }
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        std::fs::write(&self.path, doc).map_err(Error::Io)?;
        Ok(())
    }

    /// The whole memory document. Missing file → empty string.
    pub fn recall(&self) -> String {
        std::fs::read_to_string(&self.path).unwrap_or_default()
    }

    /// One category's section body, heading excluded.
    pub fn recall_category(&self, category: &str) -> Option<String> {
        let doc = self.recall();
        let heading = format!("## {}", category.trim());
        let (start, end) = find_section(&doc, &heading)?;
        let body = doc[start..end]
            .strip_prefix(&heading)
            .unwrap_or(&doc[start..end])
            .trim()
            .to_owned();
        Some(body)
    }

    /// All `(category, body)` sections in document order.
    pub fn sections(&self) -> Vec<(String, String)> {
        let doc = self.recall();
        let mut sections = Vec::new();
        let mut current: Option<(String, String)> = None;
        for line in doc.lines() {
            if let Some(name) = line.strip_prefix("## ") {
                if let Some(done) = current.take() {
                    sections.push(done);
                }
                current = Some((name.trim().to_owned(), String::new()));
            } else if let Some((_, ref mut body)) = current {
                body.push_str(line);
                body.push('\n');
            }
        }
        if let Some(done) = current {
            sections.push(done);
        }
        for (_, body) in &mut sections {
            *body = body.trim().to_owned();
        }
        sections
    }
}

/// Byte range `[start, end)` of a section: from its heading line up to
/// the next `## ` heading or end of document.
fn find_section(doc: &str, heading: &str) -> Option<(usize, usize)> {
    let mut offset = 0;
    for line in doc.split_inclusive('\n') {
        if line.trim_end() == heading {
            let start = offset;
            let mut end = doc.len();
            let mut scan = offset + line.len();
            for rest in doc[scan..].split_inclusive('\n') {
                if rest.starts_with("## ") {
                    end = scan;
                    break;
                }
                scan += rest.len();
            }
            return Some((start, end));
        }
        offset += line.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> (tempfile::TempDir, LongTermMemory) {
        let dir = tempfile::tempdir().unwrap();
        let mem = LongTermMemory::new(&dir.path().join("memory.md"));
        (dir, mem)
    }

    #[test]
    fn remember_creates_heading_and_entry() {
        let (_dir, mem) = memory();
        mem.remember("prefers dark mode", "user").unwrap();
        let doc = mem.recall();
        assert!(doc.contains("## user"));
        assert!(doc.contains("prefers dark mode"));
    }

    #[test]
    fn entries_group_under_their_category() {
        let (_dir, mem) = memory();
        mem.remember("fact one", "project").unwrap();
        mem.remember("likes rust", "user").unwrap();
        mem.remember("fact two", "project").unwrap();

        let body = mem.recall_category("project").unwrap();
        assert!(body.contains("fact one"));
        assert!(body.contains("fact two"));
        assert!(!body.contains("likes rust"));
    }

    #[test]
    fn sections_enumerate_in_order() {
        let (_dir, mem) = memory();
        mem.remember("a", "alpha").unwrap();
        mem.remember("b", "beta").unwrap();
        let names: Vec<String> = mem.sections().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn recall_of_missing_file_is_empty() {
        let (_dir, mem) = memory();
        assert_eq!(mem.recall(), "");
        assert!(mem.recall_category("x").is_none());
    }
}
