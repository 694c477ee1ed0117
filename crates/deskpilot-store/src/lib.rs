//! Conversation snapshots on disk.
//!
//! One file per conversation, holding the entire log as a JSON array of
//! message records. The filename is derived once from the first message and
//! reused for every later snapshot, so re-saving overwrites rather than
//! fragments. Writes go through a temp file and rename: a snapshot on disk
//! is always a complete, parseable log.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Local};
use deskpilot_core::{Message, Result};
use uuid::Uuid;

/// Filesystem-hostile characters stripped from derived names.
const ILLEGAL: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*', '!', '\n'];

pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<slug>__<timestamp>.json`, from the first message's opening words.
    #[must_use]
    pub fn derive_filename(first_content: &str, at: DateTime<Local>) -> String {
        let stamp = at.format("%B_%d_%Y_%H-%M-%S");
        format!("{}__{stamp}.json", slug(first_content))
    }

    /// Writes the full log snapshot, overwriting any previous one under the
    /// same name. Atomic: either the complete new snapshot lands or the old
    /// file stays untouched.
    pub fn save(&self, filename: &str, log: &[Message]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating conversation dir {}", self.dir.display()))?;
        let path = self.dir.join(filename);
        let staging = self.dir.join(format!(".{}.tmp", Uuid::now_v7()));
        fs::write(&staging, serde_json::to_vec_pretty(log)?)?;
        fs::rename(&staging, &path)
            .with_context(|| format!("publishing snapshot {}", path.display()))?;
        Ok(path)
    }

    pub fn load(&self, filename: &str) -> Result<Vec<Message>> {
        let path = self.dir.join(filename);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Snapshot filenames, newest-name-last (lexicographic).
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry
                .file_name()
                .into_string()
                .map_err(|raw| anyhow!("non-utf8 snapshot name {raw:?}"))?;
            if name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// First ~25 characters of the content, word-boundary aware for
/// space-delimited text (all but the trailing partial word, joined with
/// `_`), else the first 15 characters; illegal filename characters removed.
fn slug(content: &str) -> String {
    let head: String = content.chars().take(25).collect();
    let words: Vec<&str> = head.split(' ').collect();
    let raw = if words.len() >= 2 {
        words[..words.len() - 1].join("_")
    } else {
        content.chars().take(15).collect()
    };
    raw.chars().filter(|c| !ILLEGAL.contains(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use deskpilot_core::Role;

    fn sample_log() -> Vec<Message> {
        vec![
            Message::Text {
                role: Role::User,
                content: "open the settings panel".to_string(),
            },
            Message::Code {
                role: Role::Assistant,
                format: Some("python".to_string()),
                content: "open_settings()".to_string(),
            },
        ]
    }

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn filename_joins_leading_words_and_timestamp() {
        let name = ConversationStore::derive_filename("open the settings panel now", fixed_time());
        assert_eq!(name, "open_the_settings_panel__March_14_2026_09-26-53.json");
    }

    #[test]
    fn unspaced_content_falls_back_to_character_prefix() {
        let name = ConversationStore::derive_filename("打开设置面板并检查更新然后重启应用程序", fixed_time());
        assert!(name.starts_with("打开设置面板并检查更新然后重启__"));
    }

    #[test]
    fn illegal_characters_are_stripped() {
        let name = ConversationStore::derive_filename("what? run: ls now please", fixed_time());
        assert_eq!(name, "what_run_ls_now__March_14_2026_09-26-53.json");
    }

    #[test]
    fn save_then_load_round_trips_the_full_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConversationStore::new(dir.path());
        let log = sample_log();
        let name = ConversationStore::derive_filename(log[0].content(), fixed_time());
        store.save(&name, &log).expect("save");
        assert_eq!(store.load(&name).expect("load"), log);
    }

    #[test]
    fn resave_overwrites_the_snapshot_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConversationStore::new(dir.path());
        let mut log = sample_log();
        let name = ConversationStore::derive_filename(log[0].content(), fixed_time());
        store.save(&name, &log).expect("first save");
        log.push(Message::empty_console_output());
        store.save(&name, &log).expect("second save");
        assert_eq!(store.list().expect("list"), vec![name.clone()]);
        assert_eq!(store.load(&name).expect("load").len(), 3);
    }

    #[test]
    fn no_staging_residue_after_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConversationStore::new(dir.path());
        let name = ConversationStore::derive_filename("hello there", fixed_time());
        store.save(&name, &sample_log()).expect("save");
        let residue: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(residue.is_empty());
    }
}
