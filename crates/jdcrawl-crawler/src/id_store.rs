//! Append-only product ID files, one per keyword: `<dir>/<slug>.txt` with
//! one newline-terminated ID per line. An unterminated final line is what an
//! interrupted append leaves behind; it is ignored on read and cut off before
//! the next append.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use jdcrawl_core::{keyword_slug, ProductId};
use jdcrawl_scraper::IdSink;
use tokio::io::AsyncWriteExt;

use crate::error::IdStoreError;

#[derive(Debug)]
pub struct FileIdStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileIdStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// # Errors
    ///
    /// Returns [`IdStoreError::InvalidKeyword`] if the keyword slugs to nothing.
    pub fn path_for(&self, keyword: &str) -> Result<PathBuf, IdStoreError> {
        let slug = keyword_slug(keyword);
        if slug.is_empty() {
            return Err(IdStoreError::InvalidKeyword(keyword.to_owned()));
        }
        Ok(self.dir.join(format!("{slug}.txt")))
    }

    /// IDs stored for `keyword`; empty if nothing was discovered yet.
    ///
    /// # Errors
    ///
    /// Returns [`IdStoreError`] if the file cannot be read or holds an
    /// invalid ID.
    pub async fn load(&self, keyword: &str) -> Result<BTreeSet<ProductId>, IdStoreError> {
        read_ids(&self.path_for(keyword)?).await
    }

    /// Union of every keyword file in the store directory.
    ///
    /// # Errors
    ///
    /// Returns [`IdStoreError`] if the directory or a file cannot be read.
    pub async fn load_all(&self) -> Result<BTreeSet<ProductId>, IdStoreError> {
        let io_err = |source| IdStoreError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(io_err(e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "txt") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut all = BTreeSet::new();
        for path in paths {
            all.extend(read_ids(&path).await?);
        }
        Ok(all)
    }
}

impl IdSink for FileIdStore {
    type Error = IdStoreError;

    async fn persist(
        &self,
        keyword: &str,
        ids: &BTreeSet<ProductId>,
    ) -> Result<usize, IdStoreError> {
        let path = self.path_for(keyword)?;
        let _guard = self.write_lock.lock().await;

        let IdFile { ids: existing, valid_len } = read_id_file(&path).await?;
        let fresh: Vec<&ProductId> = ids.difference(&existing).collect();
        if fresh.is_empty() {
            tracing::debug!(keyword, path = %path.display(), "no new product ids");
            return Ok(0);
        }
        if let Some(len) = valid_len {
            truncate_partial_tail(&path, len).await?;
        }

        let mut buffer = String::new();
        for id in &fresh {
            buffer.push_str(id.as_str());
            buffer.push('\n');
        }

        let io_err = |source| IdStoreError::Io {
            path: path.clone(),
            source,
        };
        tokio::fs::create_dir_all(&self.dir).await.map_err(|source| IdStoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        file.write_all(buffer.as_bytes()).await.map_err(io_err)?;
        file.sync_data().await.map_err(io_err)?;

        tracing::info!(
            keyword,
            path = %path.display(),
            added = fresh.len(),
            total = existing.len() + fresh.len(),
            "persisted product ids"
        );
        Ok(fresh.len())
    }
}

struct IdFile {
    ids: BTreeSet<ProductId>,
    /// Length of the complete lines when the file ends in a partial one.
    valid_len: Option<u64>,
}

async fn read_ids(path: &Path) -> Result<BTreeSet<ProductId>, IdStoreError> {
    Ok(read_id_file(path).await?.ids)
}

async fn read_id_file(path: &Path) -> Result<IdFile, IdStoreError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(IdFile {
                ids: BTreeSet::new(),
                valid_len: None,
            })
        }
        Err(source) => {
            return Err(IdStoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let complete_len = raw.iter().rposition(|b| *b == b'\n').map_or(0, |pos| pos + 1);
    let valid_len = (complete_len < raw.len()).then_some(complete_len as u64);
    if valid_len.is_some() {
        tracing::warn!(path = %path.display(), "ignoring unterminated final product id line");
    }
    let complete = std::str::from_utf8(&raw[..complete_len]).map_err(|source| {
        IdStoreError::InvalidUtf8 {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let mut ids = BTreeSet::new();
    for (idx, line) in complete.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let id = ProductId::new(line).map_err(|e| IdStoreError::InvalidLine {
            path: path.to_path_buf(),
            line: idx + 1,
            reason: e.to_string(),
        })?;
        ids.insert(id);
    }
    Ok(IdFile { ids, valid_len })
}

async fn truncate_partial_tail(path: &Path, len: u64) -> Result<(), IdStoreError> {
    tracing::warn!(path = %path.display(), len, "truncating partial product id line");
    let io_err = |source| IdStoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(io_err)?;
    file.set_len(len).await.map_err(io_err)?;
    file.sync_data().await.map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<ProductId> {
        ids.iter().map(|id| ProductId::new(*id).unwrap()).collect()
    }

    #[tokio::test]
    async fn persist_is_a_set_union() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIdStore::new(dir.path().join("ids"));

        assert_eq!(store.persist("Laptop", &set(&["A", "B"])).await.unwrap(), 2);
        assert_eq!(store.persist("laptop", &set(&["B", "C"])).await.unwrap(), 1);
        assert_eq!(store.persist("laptop", &set(&["A"])).await.unwrap(), 0);

        assert_eq!(store.load("laptop").await.unwrap(), set(&["A", "B", "C"]));
        let raw = tokio::fs::read_to_string(store.path_for("laptop").unwrap())
            .await
            .unwrap();
        assert_eq!(raw.lines().count(), 3);
    }

    #[tokio::test]
    async fn load_all_merges_keywords() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIdStore::new(dir.path());

        store.persist("laptop", &set(&["A", "B"])).await.unwrap();
        store.persist("手机", &set(&["B", "Z"])).await.unwrap();

        assert_eq!(store.load_all().await.unwrap(), set(&["A", "B", "Z"]));
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIdStore::new(dir.path().join("absent"));
        assert!(store.load_all().await.unwrap().is_empty());
        assert!(store.load("laptop").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hand_edited_files_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIdStore::new(dir.path());
        tokio::fs::write(dir.path().join("manual.txt"), "# seeds\n  100 \n\n200\n")
            .await
            .unwrap();

        assert_eq!(store.load_all().await.unwrap(), set(&["100", "200"]));
    }

    #[tokio::test]
    async fn torn_append_does_not_merge_into_the_next_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileIdStore::new(dir.path());
        store.persist("laptop", &set(&["1000001"])).await.unwrap();

        let path = store.path_for("laptop").unwrap();
        let mut raw = tokio::fs::read_to_string(&path).await.unwrap();
        raw.push_str("100");
        tokio::fs::write(&path, raw).await.unwrap();
        assert_eq!(store.load("laptop").await.unwrap(), set(&["1000001"]));

        assert_eq!(
            store
                .persist("laptop", &set(&["1000001", "1000002"]))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store.load("laptop").await.unwrap(),
            set(&["1000001", "1000002"])
        );
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(raw, "1000001\n1000002\n");
    }

    #[test]
    fn punctuation_only_keyword_is_rejected() {
        let store = FileIdStore::new("/tmp/ids");
        assert!(matches!(
            store.path_for("!!!"),
            Err(IdStoreError::InvalidKeyword(_))
        ));
    }
}
