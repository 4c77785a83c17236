//! Content-addressed chunk store: chunking, XOR parity, dedup, and
//! atomic whole-file retrieval with single-chunk recovery.
//!
//! Chunks live flat in a single directory, one file per chunk named by
//! its hex hash. The chunk cache is immutable and content-addressed, so
//! writes are idempotent and reads are served through a read-only mmap.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use bytes::Bytes;
use meshcas_core::hash::Sha256Hasher;
use meshcas_core::wire::FileManifest;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CasError {
    #[error("no manifest for file hash {0}")]
    NotFound(String),
    #[error("more than one data chunk missing for {0}; cannot recover")]
    InsufficientRedundancy(String),
    #[error("parity chunk missing for {0}")]
    MissingParity(String),
    #[error("reconstructed file hash mismatch: expected {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },
}

/// Content-addressed chunk cache. Each chunk file lives directly under
/// `root`, named by its lowercase hex SHA-256 hash, e.g. `abcdef01...`.
#[derive(Clone)]
pub struct ChunkCache {
    root: PathBuf,
}

impl ChunkCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create chunk store root: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn has(&self, hash_hex: &str) -> bool {
        self.chunk_path(hash_hex).exists()
    }

    /// Retrieve a chunk, mmap-backed since chunk files never change once
    /// written.
    pub fn get(&self, hash_hex: &str) -> Result<Option<Bytes>> {
        let path = self.chunk_path(hash_hex);
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(&path)
            .with_context(|| format!("failed to open chunk: {}", path.display()))?;
        // Safety: chunk files are immutable once written; no concurrent
        // mutation is possible while this mapping is live.
        let mmap = unsafe {
            Mmap::map(&file).with_context(|| format!("failed to mmap chunk: {}", path.display()))?
        };
        Ok(Some(Bytes::copy_from_slice(&mmap)))
    }

    /// Store a chunk. Idempotent: a chunk that already exists on disk is
    /// left untouched (content addressing makes the existing copy correct
    /// by construction).
    pub fn put(&self, hash_hex: &str, data: &[u8]) -> Result<()> {
        let path = self.chunk_path(hash_hex);
        if path.exists() {
            return Ok(());
        }
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)
                .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
            file.write_all(data).context("failed to write chunk data")?;
            file.sync_all().context("failed to sync chunk to disk")?;
        }
        fs::rename(&tmp_path, &path).with_context(|| {
            format!("failed to rename {} to {}", tmp_path.display(), path.display())
        })?;
        tracing::trace!(hash = hash_hex, "chunk stored");
        Ok(())
    }

    fn chunk_path(&self, hash_hex: &str) -> PathBuf {
        self.root.join(hash_hex)
    }

    /// True for anything in `root` that isn't a stored chunk: the manifest
    /// index and its rename-in-progress temp files.
    fn is_chunk_entry(name: &std::ffi::OsStr) -> bool {
        let name = name.to_string_lossy();
        name != "cas_index.json" && !name.ends_with(".tmp") && !name.ends_with(".json.tmp")
    }

    pub fn count(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| Self::is_chunk_entry(&entry.file_name()))
            .count()
    }

    pub fn size(&self) -> u64 {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| Self::is_chunk_entry(&entry.file_name()))
            .filter_map(|entry| entry.metadata().ok())
            .map(|meta| meta.len())
            .sum()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// On-disk JSON index mapping `file_hash -> FileManifest`, persisted at
/// `<root>/cas_index.json`.
struct ManifestIndex {
    path: PathBuf,
    entries: HashMap<String, FileManifest>,
}

impl ManifestIndex {
    fn load(root: &Path) -> Result<Self> {
        let path = root.join("cas_index.json");
        let entries = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            HashMap::new()
        };
        Ok(Self { path, entries })
    }

    fn save(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to rename {} into place", tmp.display()))?;
        Ok(())
    }
}

/// Report produced by [`Cas::verify_integrity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub ok: bool,
    pub missing_chunks: Vec<String>,
}

/// The content-addressed store: chunk cache + manifest index + the
/// chunking/parity/reassembly operations built on top of them.
pub struct Cas {
    root: PathBuf,
    cache: ChunkCache,
    manifests: Mutex<ManifestIndex>,
    chunk_size: usize,
}

impl Cas {
    pub fn open(root: impl Into<PathBuf>, chunk_size: usize) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create cas root: {}", root.display()))?;
        let cache = ChunkCache::new(&root)?;
        let manifests = Mutex::new(ManifestIndex::load(&root)?);
        Ok(Self { root, cache, manifests, chunk_size: chunk_size.max(1) })
    }

    pub fn chunk_cache(&self) -> &ChunkCache {
        &self.cache
    }

    /// Split `reader`'s contents into fixed-size data chunks, compute one
    /// XOR parity chunk, write every chunk (deduplicated by content hash),
    /// and insert/refresh the file's manifest.
    pub fn store_reader<R: Read>(
        &self,
        mut reader: R,
        original_name: &str,
    ) -> Result<FileManifest> {
        let mut file_hasher = Sha256Hasher::new();
        let mut data_chunks = Vec::new();
        let mut data_bytes: Vec<Vec<u8>> = Vec::new();
        let mut size: u64 = 0;
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let n = read_full(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }
            let block = &buf[..n];
            file_hasher.update(block);
            size += n as u64;
            let block_hash = meshcas_core::hash::sha256_hex(block);
            self.cache.put(&block_hash, block)?;
            data_chunks.push(block_hash);
            data_bytes.push(block.to_vec());
            if n < self.chunk_size {
                break;
            }
        }

        if data_chunks.is_empty() {
            // Zero-byte file: one empty data chunk, no parity needed
            // beyond XOR-of-nothing, which is just the empty chunk again.
            let empty_hash = meshcas_core::hash::sha256_hex(b"");
            self.cache.put(&empty_hash, b"")?;
            data_chunks.push(empty_hash.clone());
            data_bytes.push(Vec::new());
        }

        let max_len = data_bytes.iter().map(|c| c.len()).max().unwrap_or(0);
        let mut parity = vec![0u8; max_len];
        for block in &data_bytes {
            for (i, b) in block.iter().enumerate() {
                parity[i] ^= b;
            }
        }
        let parity_hash = meshcas_core::hash::sha256_hex(&parity);
        self.cache.put(&parity_hash, &parity)?;

        let file_hash = file_hasher.finalize_hex();
        let k = data_chunks.len();
        let now = now_secs();

        let manifest = FileManifest {
            file_hash: file_hash.clone(),
            original_name: original_name.to_string(),
            size,
            chunk_size: self.chunk_size as u64,
            k,
            m: 1,
            data_chunks,
            parity_chunks: vec![parity_hash],
            stored_at: now,
            last_accessed: now,
        };

        let mut index = self.manifests.lock().unwrap();
        let to_store = match index.entries.get(&file_hash) {
            Some(existing) => {
                let mut refreshed = existing.clone();
                refreshed.last_accessed = now;
                refreshed
            }
            None => manifest,
        };
        index.entries.insert(file_hash.clone(), to_store.clone());
        index.save()?;
        Ok(to_store)
    }

    pub fn store_file(&self, path: impl AsRef<Path>) -> Result<FileManifest> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        self.store_reader(BufReader::new(file), &name)
    }

    pub fn store_bytes(&self, data: &[u8], original_name: &str) -> Result<FileManifest> {
        self.store_reader(std::io::Cursor::new(data), original_name)
    }

    pub fn get_manifest(&self, file_hash: &str) -> Option<FileManifest> {
        self.manifests.lock().unwrap().entries.get(file_hash).cloned()
    }

    pub fn list_manifests(&self) -> Vec<FileManifest> {
        self.manifests.lock().unwrap().entries.values().cloned().collect()
    }

    /// Store a manifest learned from elsewhere (e.g. resolved from the
    /// DHT before a download), without owning any of its chunks yet.
    pub fn adopt_manifest(&self, manifest: FileManifest) -> Result<()> {
        let mut index = self.manifests.lock().unwrap();
        index.entries.insert(manifest.file_hash.clone(), manifest);
        index.save()
    }

    pub fn verify_integrity(&self, file_hash: &str) -> Result<IntegrityReport> {
        let manifest = self
            .get_manifest(file_hash)
            .ok_or_else(|| CasError::NotFound(file_hash.to_string()))?;
        let mut missing = Vec::new();
        for h in manifest.data_chunks.iter().chain(manifest.parity_chunks.iter()) {
            if !self.cache.has(h) {
                missing.push(h.clone());
            }
        }
        Ok(IntegrityReport { ok: missing.is_empty(), missing_chunks: missing })
    }

    /// Reassemble the file named by `file_hash` into `out_path`,
    /// recovering at most one missing data chunk via XOR parity.
    /// Verifies the whole-file hash before returning success; deletes any
    /// partial output on failure.
    pub fn retrieve_file(&self, file_hash: &str, out_path: impl AsRef<Path>) -> Result<()> {
        let out_path = out_path.as_ref();
        let manifest = self
            .get_manifest(file_hash)
            .ok_or_else(|| CasError::NotFound(file_hash.to_string()))?;

        let mut blocks: Vec<Option<Bytes>> = Vec::with_capacity(manifest.data_chunks.len());
        let mut missing_idx = Vec::new();
        for (i, h) in manifest.data_chunks.iter().enumerate() {
            match self.cache.get(h)? {
                Some(b) => blocks.push(Some(b)),
                None => {
                    blocks.push(None);
                    missing_idx.push(i);
                }
            }
        }

        if missing_idx.len() > 1 {
            return Err(CasError::InsufficientRedundancy(file_hash.to_string()).into());
        }

        if let Some(&idx) = missing_idx.first() {
            let parity_hash = manifest
                .parity_chunks
                .first()
                .ok_or_else(|| CasError::MissingParity(file_hash.to_string()))?;
            let parity = self
                .cache
                .get(parity_hash)?
                .ok_or_else(|| CasError::MissingParity(file_hash.to_string()))?;
            let mut recovered = parity.to_vec();
            for (i, block) in blocks.iter().enumerate() {
                if i == idx {
                    continue;
                }
                if let Some(b) = block {
                    for (j, byte) in b.iter().enumerate() {
                        recovered[j] ^= byte;
                    }
                }
            }
            blocks[idx] = Some(Bytes::from(recovered));
        }

        let tmp_path = tmp_sibling(out_path);
        {
            let mut tmp_file = File::create(&tmp_path)
                .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
            for block in &blocks {
                let block = block.as_ref().expect("all blocks present after recovery");
                tmp_file.write_all(block)?;
            }
            tmp_file.set_len(manifest.size)?;
            tmp_file.sync_all()?;
        }

        let mut verify_hasher = Sha256Hasher::new();
        {
            let mut f = File::open(&tmp_path)?;
            let mut buf = [0u8; 65536];
            loop {
                let n = f.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                verify_hasher.update(&buf[..n]);
            }
        }
        let actual = verify_hasher.finalize_hex();
        if actual != file_hash {
            let _ = fs::remove_file(&tmp_path);
            return Err(CasError::IntegrityCheckFailed {
                expected: file_hash.to_string(),
                actual,
            }
            .into());
        }

        fs::rename(&tmp_path, out_path).with_context(|| {
            format!("failed to rename {} to {}", tmp_path.display(), out_path.display())
        })?;

        let mut index = self.manifests.lock().unwrap();
        if let Some(m) = index.entries.get_mut(file_hash) {
            m.last_accessed = now_secs();
        }
        index.save()?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "out".to_string());
    name.push_str(".part");
    path.with_file_name(name)
}

/// Read until `buf` is full or the reader is exhausted, the way a fixed
/// chunk size needs a full-block read rather than whatever one `read`
/// call happens to return.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cas(chunk_size: usize) -> Cas {
        let dir = tempfile::Builder::new()
            .prefix("meshcas-cas-test-")
            .tempdir()
            .unwrap()
            .into_path();
        Cas::open(&dir, chunk_size).unwrap()
    }

    #[test]
    fn small_file_round_trip() {
        let cas = temp_cas(65536);
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let manifest = cas.store_bytes(&data, "blob.bin").unwrap();
        assert_eq!(manifest.k, 4);
        assert_eq!(manifest.m, 1);
        assert_eq!(manifest.data_chunks.len(), 4);
        assert_eq!(manifest.parity_chunks.len(), 1);

        let out_dir = cas.root().join("out");
        fs::create_dir_all(&out_dir).unwrap();
        let out_path = out_dir.join("restored.bin");
        cas.retrieve_file(&manifest.file_hash, &out_path).unwrap();

        let restored = fs::read(&out_path).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn dedup_does_not_duplicate_chunk_files() {
        let cas = temp_cas(65536);
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let m1 = cas.store_bytes(&data, "a.bin").unwrap();
        let count_after_first = cas.chunk_cache().count();
        let m2 = cas.store_bytes(&data, "a.bin").unwrap();
        assert_eq!(m1.file_hash, m2.file_hash);
        assert_eq!(cas.chunk_cache().count(), count_after_first);
        assert_eq!(cas.list_manifests().len(), 1);
    }

    #[test]
    fn single_chunk_loss_is_recoverable() {
        let cas = temp_cas(65536);
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let manifest = cas.store_bytes(&data, "a.bin").unwrap();

        let victim = &manifest.data_chunks[1];
        let victim_path = cas.root().join(victim);
        fs::remove_file(&victim_path).unwrap();

        let out_path = cas.root().join("restored.bin");
        cas.retrieve_file(&manifest.file_hash, &out_path).unwrap();
        assert_eq!(fs::read(&out_path).unwrap(), data);
    }

    #[test]
    fn two_chunk_loss_is_unrecoverable() {
        let cas = temp_cas(65536);
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let manifest = cas.store_bytes(&data, "a.bin").unwrap();

        for victim in &manifest.data_chunks[0..2] {
            let path = cas.root().join(victim);
            fs::remove_file(&path).unwrap();
        }

        let out_path = cas.root().join("restored.bin");
        let err = cas.retrieve_file(&manifest.file_hash, &out_path);
        assert!(err.is_err());
        assert!(!out_path.exists());
    }

    #[test]
    fn verify_integrity_reports_missing_chunks() {
        let cas = temp_cas(65536);
        let data = b"small file, one chunk".to_vec();
        let manifest = cas.store_bytes(&data, "tiny.bin").unwrap();
        assert!(cas.verify_integrity(&manifest.file_hash).unwrap().ok);

        let victim = &manifest.data_chunks[0];
        let path = cas.root().join(victim);
        fs::remove_file(&path).unwrap();
        let report = cas.verify_integrity(&manifest.file_hash).unwrap();
        assert!(!report.ok);
        assert_eq!(report.missing_chunks, vec![victim.clone()]);
    }
}
