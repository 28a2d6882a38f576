//! Local trace bundles.
//!
//! A bundle is a directory `traces/<bundle_id>/` holding:
//! - `bundle.json`: identity and creation time
//! - `spans.ndjson`: one exported [`SpanRecord`] per line, in export order
//! - `manifest.json`: SHA-256 and size of every other file
//!
//! JSON files are replaced atomically (write to `.tmp`, then rename). The
//! manifest is rewritten after every appended batch, so a bundle on disk is
//! always valid between batches.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use lantern_core::{hex_lower, Clock, SpanRecord, SystemClock, TraceId};
use lantern_net::{SinkCapabilities, SinkResult, TraceSink};

const BUNDLE_SCHEMA_V1: u32 = 1;
const HASH_ALGO: &str = "sha256";
const BUNDLE_FILE: &str = "bundle.json";
const SPANS_FILE: &str = "spans.ndjson";
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ManifestV1 {
    schema_version: u32,
    bundle_id: TraceId,
    hash_algo: String,
    entries: Vec<ManifestEntryV1>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct ManifestEntryV1 {
    // relative to the bundle directory, `/`-separated
    path: String,
    sha256: String,
    bytes: u64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct BundleFileV1 {
    schema_version: u32,
    bundle_id: TraceId,
    created_unix_nanos: u64,
    lantern_version: String,
}

/// Reader and writer for one bundle directory.
#[derive(Debug, Clone)]
pub struct TraceBundle {
    dir: PathBuf,
    bundle_id: TraceId,
}

impl TraceBundle {
    /// Creates `<base>/traces/<bundle_id>/` with an empty span log and a
    /// valid manifest.
    pub fn create(base: impl AsRef<Path>, bundle_id: TraceId) -> io::Result<Self> {
        if !bundle_id.is_valid() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "bundle id must be non-zero",
            ));
        }

        let dir = base.as_ref().join("traces").join(bundle_id.to_hex());
        if dir.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("trace bundle already exists: {}", dir.display()),
            ));
        }
        fs::create_dir_all(&dir)?;

        let bundle_file = BundleFileV1 {
            schema_version: BUNDLE_SCHEMA_V1,
            bundle_id,
            created_unix_nanos: SystemClock.now_unix_nanos(),
            lantern_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        write_json_pretty_atomic(&dir.join(BUNDLE_FILE), &bundle_file)?;
        File::create(dir.join(SPANS_FILE))?;

        let bundle = Self { dir, bundle_id };
        bundle.finalize_manifest()?;
        tracing::debug!(dir = %bundle.dir.display(), "trace bundle created");
        Ok(bundle)
    }

    /// Opens an existing bundle by reading `bundle.json`. Does not validate.
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let bundle_file: BundleFileV1 = read_json(&dir.join(BUNDLE_FILE))?;
        if bundle_file.schema_version != BUNDLE_SCHEMA_V1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unsupported bundle schema_version",
            ));
        }
        Ok(Self {
            dir,
            bundle_id: bundle_file.bundle_id,
        })
    }

    pub fn bundle_id(&self) -> TraceId {
        self.bundle_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn spans_path(&self) -> PathBuf {
        self.dir.join(SPANS_FILE)
    }

    /// Appends records as NDJSON lines in a single write.
    pub fn append_spans(&self, spans: &[SpanRecord]) -> io::Result<()> {
        let mut buf = Vec::new();
        for span in spans {
            serde_json::to_writer(&mut buf, span).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            buf.push(b'\n');
        }
        let mut file = OpenOptions::new().append(true).open(self.spans_path())?;
        file.write_all(&buf)?;
        file.flush()
    }

    /// Every record in `spans.ndjson`, in file order.
    pub fn read_spans(&self) -> io::Result<Vec<SpanRecord>> {
        let reader = io::BufReader::new(File::open(self.spans_path())?);
        let mut out = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let span = serde_json::from_str(&line).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid span record at line {}: {e}", i + 1),
                )
            })?;
            out.push(span);
        }
        Ok(out)
    }

    /// Recomputes `manifest.json` from the files on disk.
    pub fn finalize_manifest(&self) -> io::Result<()> {
        let mut entries = Vec::new();
        for name in [BUNDLE_FILE, SPANS_FILE] {
            let path = self.dir.join(name);
            entries.push(ManifestEntryV1 {
                path: name.to_string(),
                sha256: hex_lower(&sha256_file(&path)?),
                bytes: fs::metadata(&path)?.len(),
            });
        }

        let manifest = ManifestV1 {
            schema_version: BUNDLE_SCHEMA_V1,
            bundle_id: self.bundle_id,
            hash_algo: HASH_ALGO.to_string(),
            entries,
        };
        write_json_pretty_atomic(&self.dir.join(MANIFEST_FILE), &manifest)
    }

    /// Checks `manifest.json` against the bytes on disk.
    pub fn validate_manifest(&self) -> io::Result<()> {
        let manifest: ManifestV1 = read_json(&self.dir.join(MANIFEST_FILE))?;

        if manifest.schema_version != BUNDLE_SCHEMA_V1 {
            return Err(invalid("unsupported manifest schema_version"));
        }
        if manifest.bundle_id != self.bundle_id {
            return Err(invalid("manifest bundle_id mismatch"));
        }
        if manifest.hash_algo != HASH_ALGO {
            return Err(invalid("unsupported hash algorithm"));
        }
        for required in [BUNDLE_FILE, SPANS_FILE] {
            if !manifest.entries.iter().any(|e| e.path == required) {
                return Err(invalid(format!("manifest does not list {required}")));
            }
        }

        for entry in &manifest.entries {
            let path = self.dir.join(&entry.path);
            if !path.is_file() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("missing file listed in manifest: {}", entry.path),
                ));
            }
            if fs::metadata(&path)?.len() != entry.bytes {
                return Err(invalid(format!(
                    "size mismatch for {} (expected {})",
                    entry.path, entry.bytes
                )));
            }
            if hex_lower(&sha256_file(&path)?) != entry.sha256 {
                return Err(invalid(format!("sha256 mismatch for {}", entry.path)));
            }
        }
        Ok(())
    }
}

/// A [`TraceSink`] that appends each batch to a [`TraceBundle`].
///
/// File work runs on the blocking pool, one writer at a time, so NDJSON
/// lines never interleave.
#[derive(Debug)]
pub struct TraceBundleSink {
    bundle: TraceBundle,
    lock: Arc<Mutex<()>>,
}

impl TraceBundleSink {
    pub fn new(bundle: TraceBundle) -> Self {
        Self {
            bundle,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn bundle(&self) -> &TraceBundle {
        &self.bundle
    }
}

fn write_batch(bundle: &TraceBundle, lock: &Mutex<()>, spans: &[SpanRecord]) -> io::Result<()> {
    let _guard = lock.lock();
    bundle.append_spans(spans)?;
    bundle.finalize_manifest()
}

#[async_trait]
impl TraceSink for TraceBundleSink {
    async fn send_batch(&self, spans: &[SpanRecord]) -> SinkResult<()> {
        let bundle = self.bundle.clone();
        let lock = Arc::clone(&self.lock);
        let batch = spans.to_vec();
        tokio::task::spawn_blocking(move || write_batch(&bundle, &lock, &batch))
            .await
            .map_err(io::Error::other)??;
        tracing::trace!(count = spans.len(), "spans written to bundle");
        Ok(())
    }

    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities {
            max_batch_size: 500,
        }
    }
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

fn write_json_pretty_atomic<T: serde::Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    atomic_write(path, &json)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<T> {
    let file = File::open(path)?;
    serde_json::from_reader(io::BufReader::new(file))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid file name"))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.flush()?;
        let _ = f.sync_all();
    }
    fs::rename(&tmp_path, path)
}

fn sha256_file(path: &Path) -> io::Result<[u8; 32]> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Ok(out)
}
