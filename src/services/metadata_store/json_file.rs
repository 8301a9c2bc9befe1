//! Append-only JSON Lines metadata store.
//!
//! One record per line. Appends go through a single async mutex and open
//! the file in append mode, so records are never rewritten. A missing file
//! is the empty collection.
//!
//! A crash mid-append can leave a final line without its newline. Reads
//! skip such a line when it does not parse, and the next append cuts it
//! off before writing. Unparseable lines anywhere else are corruption.

use super::{MetadataError, MetadataResult, MetadataStore};
use crate::models::record::UploadRecord;
use async_trait::async_trait;
use std::{
    io::{ErrorKind, SeekFrom},
    path::PathBuf,
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};
use tracing::{debug, warn};

pub struct JsonLinesMetadataStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl JsonLinesMetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    /// Put the file back on a line boundary before appending.
    ///
    /// A complete record missing only its newline gets terminated; anything
    /// else after the last newline is truncated.
    async fn repair_tail(&self, file: &mut File) -> MetadataResult<()> {
        let len = file.metadata().await?.len();
        if len == 0 {
            return Ok(());
        }
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1)).await?;
        file.read_exact(&mut last).await?;
        if last[0] == b'\n' {
            return Ok(());
        }

        let contents = fs::read(&self.path).await?;
        let start = contents
            .iter()
            .rposition(|byte| *byte == b'\n')
            .map_or(0, |idx| idx + 1);
        let fragment = &contents[start..];
        if serde_json::from_slice::<UploadRecord>(fragment).is_ok() {
            file.write_all(b"\n").await?;
        } else {
            warn!(
                path = %self.path.display(),
                bytes = fragment.len(),
                "truncating partial trailing record"
            );
            file.set_len(start as u64).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for JsonLinesMetadataStore {
    async fn append(&self, record: &UploadRecord) -> MetadataResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.writer.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;
        self.repair_tail(&mut file).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;

        debug!(record_id = %record.id, path = %self.path.display(), "record appended");
        Ok(())
    }

    async fn load_all(&self) -> MetadataResult<Vec<UploadRecord>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let tail_start = contents.rfind('\n').map_or(0, |idx| idx + 1);
        let torn_tail = !contents[tail_start..].trim().is_empty();

        let lines: Vec<(usize, &str)> = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .collect();
        let last = lines.len();

        let mut records = Vec::with_capacity(last);
        for (pos, (idx, line)) in lines.into_iter().enumerate() {
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(source) if torn_tail && pos + 1 == last => {
                    warn!(
                        path = %self.path.display(),
                        line = idx + 1,
                        "ignoring partial trailing record: {}",
                        source
                    );
                }
                Err(source) => {
                    return Err(MetadataError::Corrupt {
                        line: idx + 1,
                        source,
                    });
                }
            }
        }
        Ok(records)
    }

    async fn check_ready(&self) -> MetadataResult<()> {
        match fs::metadata(&self.path).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn missing_file_is_an_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesMetadataStore::new(dir.path().join("records.jsonl"));

        assert!(store.load_all().await.unwrap().is_empty());
        assert!(store.find_by_original_name("a.png").await.unwrap().is_none());
        store.check_ready().await.unwrap();
    }

    #[tokio::test]
    async fn appends_create_parent_dirs_and_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLinesMetadataStore::new(dir.path().join("meta/records.jsonl"));
        let first = UploadRecord::new("p/1.png", "photo.png", Some("one".into()));
        let second = UploadRecord::new("p/2.png", "photo.png", None);
        store.append(&first).await.unwrap();
        store.append(&second).await.unwrap();

        assert_eq!(store.load_all().await.unwrap(), vec![first.clone(), second.clone()]);
        assert_eq!(
            store.find_by_original_name("photo.png").await.unwrap(),
            Some(first.clone())
        );
        assert_eq!(store.find_by_id(second.id).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonLinesMetadataStore::new(dir.path().join("records.jsonl")));

        let tasks = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let record = UploadRecord::new(format!("p/{i}.bin"), format!("{i}.bin"), None);
                    store.append(&record).await.unwrap();
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.load_all().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn corrupt_line_is_reported_with_its_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let store = JsonLinesMetadataStore::new(&path);
        store
            .append(&UploadRecord::new("p/1.png", "a.png", None))
            .await
            .unwrap();
        append_raw(&path, b"{not json}\n").await;

        match store.load_all().await {
            Err(MetadataError::Corrupt { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corrupt error, got {other:?}"),
        }
    }

    async fn append_raw(path: &std::path::Path, bytes: &[u8]) {
        let mut file = OpenOptions::new().append(true).open(path).await.unwrap();
        file.write_all(bytes).await.unwrap();
    }

    #[tokio::test]
    async fn torn_trailing_line_is_skipped_then_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let store = JsonLinesMetadataStore::new(&path);
        let first = UploadRecord::new("p/1.png", "a.png", None);
        store.append(&first).await.unwrap();
        append_raw(&path, br#"{"id":"0b1c","objectKey":"p/2"#).await;

        assert_eq!(store.load_all().await.unwrap(), vec![first.clone()]);

        let second = UploadRecord::new("p/3.png", "b.png", None);
        store.append(&second).await.unwrap();

        assert_eq!(store.load_all().await.unwrap(), vec![first, second]);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("0b1c"), "{text}");
    }

    #[tokio::test]
    async fn complete_record_missing_its_newline_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let store = JsonLinesMetadataStore::new(&path);
        let first = UploadRecord::new("p/1.png", "a.png", None);
        std::fs::write(&path, serde_json::to_string(&first).unwrap()).unwrap();

        assert_eq!(store.load_all().await.unwrap(), vec![first.clone()]);

        let second = UploadRecord::new("p/2.png", "b.png", None);
        store.append(&second).await.unwrap();

        assert_eq!(store.load_all().await.unwrap(), vec![first, second]);
    }
}
