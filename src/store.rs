// src/store.rs
//! RecordStore — append-oriented JSONL dataset plus a sidecar watermark file.
//!
//! One `ArticleRecord` per line. New ids are appended; replacing an existing
//! id rewrites the whole file through a temp file + rename so readers never
//! observe a partially written record. A lock file serializes runs: two
//! pipeline invocations against the same dataset cannot overlap.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::record::{newer_than, ArticleRecord};

pub struct RecordStore {
    dataset_path: PathBuf,
    watermark_path: PathBuf,
    lock_path: PathBuf,
    records: Vec<ArticleRecord>,
    index: HashMap<String, usize>,
    watermark: Option<String>,
}

impl RecordStore {
    /// Open (creating parents as needed) and take the run lock. Fails if
    /// another run already holds the lock or the dataset is unreadable.
    pub fn open(dataset_path: &Path, watermark_path: &Path) -> Result<Self> {
        for path in [dataset_path, watermark_path] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("creating dir {}", parent.display()))?;
                }
            }
        }

        let lock_path = lock_path_for(dataset_path);
        acquire_lock(&lock_path)?;

        match Self::load(dataset_path, watermark_path, lock_path.clone()) {
            Ok(store) => Ok(store),
            Err(e) => {
                // Release the lock we just took before surfacing the error.
                let _ = fs::remove_file(&lock_path);
                Err(e)
            }
        }
    }

    fn load(dataset_path: &Path, watermark_path: &Path, lock_path: PathBuf) -> Result<Self> {
        let mut records = Vec::new();
        let mut index = HashMap::new();
        if dataset_path.exists() {
            let data = fs::read_to_string(dataset_path)
                .with_context(|| format!("reading dataset {}", dataset_path.display()))?;
            for (lineno, line) in data.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let rec: ArticleRecord = serde_json::from_str(line).with_context(|| {
                    format!("parsing dataset line {} of {}", lineno + 1, dataset_path.display())
                })?;
                if index.insert(rec.id.clone(), records.len()).is_some() {
                    bail!(
                        "duplicate id {} in dataset {}",
                        rec.id,
                        dataset_path.display()
                    );
                }
                records.push(rec);
            }
        }

        let watermark = match fs::read_to_string(watermark_path) {
            Ok(s) => {
                let t = s.trim();
                (!t.is_empty()).then(|| t.to_string())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("reading watermark {}", watermark_path.display()));
            }
        };

        Ok(Self {
            dataset_path: dataset_path.to_path_buf(),
            watermark_path: watermark_path.to_path_buf(),
            lock_path,
            records,
            index,
            watermark,
        })
    }

    pub fn exists(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or replace by id. New ids append a single line; replacements
    /// rewrite the dataset atomically.
    pub fn upsert(&mut self, record: ArticleRecord) -> Result<()> {
        match self.index.get(&record.id) {
            None => {
                let mut line = serde_json::to_string(&record).context("encoding record")?;
                line.push('\n');
                let mut f = OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(&self.dataset_path)
                    .with_context(|| {
                        format!("opening dataset {} for append", self.dataset_path.display())
                    })?;
                f.write_all(line.as_bytes()).with_context(|| {
                    format!("appending record {} to {}", record.id, self.dataset_path.display())
                })?;
                self.index.insert(record.id.clone(), self.records.len());
                self.records.push(record);
            }
            Some(&i) => {
                self.records[i] = record;
                self.rewrite_all()?;
            }
        }
        Ok(())
    }

    /// All records, ordered by `fetched_at` ascending (id breaks ties).
    pub fn all(&self) -> Vec<ArticleRecord> {
        let mut out = self.records.clone();
        out.sort_by(|a, b| {
            a.fetched_at
                .cmp(&b.fetched_at)
                .then_with(|| crate::record::id_cmp(&a.id, &b.id))
        });
        out
    }

    pub fn get(&self, id: &str) -> Option<&ArticleRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    pub fn watermark(&self) -> Option<&str> {
        self.watermark.as_deref()
    }

    /// Persist the watermark (temp + rename). Refuses to move backwards.
    pub fn set_watermark(&mut self, value: &str) -> Result<()> {
        if let Some(cur) = &self.watermark {
            if !newer_than(value, cur) {
                return Ok(());
            }
        }
        write_atomic(&self.watermark_path, value.as_bytes())
            .with_context(|| format!("writing watermark {}", self.watermark_path.display()))?;
        self.watermark = Some(value.to_string());
        Ok(())
    }

    fn rewrite_all(&self) -> Result<()> {
        let mut buf = String::new();
        for rec in &self.records {
            buf.push_str(&serde_json::to_string(rec).context("encoding record")?);
            buf.push('\n');
        }
        write_atomic(&self.dataset_path, buf.as_bytes())
            .with_context(|| format!("rewriting dataset {}", self.dataset_path.display()))
    }
}

impl Drop for RecordStore {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

fn lock_path_for(dataset: &Path) -> PathBuf {
    let mut os = dataset.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

/// Take the run lock. A lock naming a pid that is no longer alive was left
/// behind by a crashed run and gets reclaimed.
fn acquire_lock(lock_path: &Path) -> Result<()> {
    match try_create_lock(lock_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            if lock_is_stale(lock_path) {
                tracing::warn!(lock = %lock_path.display(), "reclaiming stale dataset lock");
                let _ = fs::remove_file(lock_path);
                try_create_lock(lock_path)
                    .with_context(|| format!("creating lock file {}", lock_path.display()))
            } else {
                bail!(
                    "dataset lock {} already held; delete it if no run is active",
                    lock_path.display()
                );
            }
        }
        Err(e) => {
            Err(e).with_context(|| format!("creating lock file {}", lock_path.display()))
        }
    }
}

fn try_create_lock(lock_path: &Path) -> std::io::Result<()> {
    let mut f = OpenOptions::new().write(true).create_new(true).open(lock_path)?;
    writeln!(f, "{}", std::process::id())?;
    Ok(())
}

fn lock_is_stale(lock_path: &Path) -> bool {
    let Ok(contents) = fs::read_to_string(lock_path) else {
        return false;
    };
    let Ok(pid) = contents.trim().parse::<u32>() else {
        return false;
    };
    if pid == std::process::id() {
        return false;
    }
    // Without /proc there is no way to tell; assume the holder is alive.
    let proc_root = Path::new("/proc");
    proc_root.exists() && !proc_root.join(pid.to_string()).exists()
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("creating temp file {}", tmp.display()))?;
        f.write_all(bytes)
            .with_context(|| format!("writing temp file {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} into place", tmp.display()))?;
    Ok(())
}
