//! Ledger persistence

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::model::LedgerEntry;
use super::LedgerError;

// ============================================================================
// SBIO: Trait for abstraction
// ============================================================================

/// Append-only entry store
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;

    /// All entries in append order
    async fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError>;
}

/// Store kept in memory
#[derive(Default)]
pub struct MemoryLedgerStore {
    entries: RwLock<Vec<LedgerEntry>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.entries.read().await.clone())
    }
}

/// Store backed by a JSON Lines file, one entry per line
pub struct JsonlLedgerStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl JsonlLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse a JSONL document; blank lines are skipped
pub fn parse_entries(content: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| LedgerError::Corrupt {
                line: idx + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl LedgerStore for JsonlLedgerStore {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut line = serde_json::to_string(entry)
            .map_err(|e| LedgerError::Serialize(e.to_string()))?;
        line.push('\n');

        let _guard = self.writer.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %self.path.display(), "Appended ledger entry");
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => parse_entries(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::model::{ImageStatus, ImageVersion};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn entry(version: &str) -> LedgerEntry {
        LedgerEntry::Image(ImageVersion {
            id: Uuid::new_v4(),
            service: "nlp".into(),
            version: version.into(),
            image: format!("r/nlp:{}", version),
            status: ImageStatus::Ready,
            digest: None,
            git_commit: None,
            recorded_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        })
    }

    #[tokio::test]
    async fn test_jsonl_roundtrip_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlLedgerStore::new(dir.path().join("nested/ledger.jsonl"));
        assert!(store.entries().await.unwrap().is_empty());

        let first = entry("1.0");
        let second = entry("1.1");
        store.append(&first).await.unwrap();
        store.append(&second).await.unwrap();

        let entries = store.entries().await.unwrap();
        assert_eq!(entries, vec![first, second]);

        let reopened = JsonlLedgerStore::new(store.path());
        assert_eq!(reopened.entries().await.unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_line_is_reported() {
        let err = parse_entries("\n{not json}\n").unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { line: 2, .. }));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryLedgerStore::new();
        store.append(&entry("2.0")).await.unwrap();
        assert_eq!(store.entries().await.unwrap().len(), 1);
    }
}
