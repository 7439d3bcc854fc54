//! Archive codec.
//!
//! Packs a directory into a single gzip-compressed tar file and unpacks such
//! a file back into a directory. Packing is deterministic: entries are sorted
//! by path and headers carry no timestamps or ownership, so identical trees
//! produce identical archives.
//!
//! Unpacking decodes entries on a blocking thread and writes files
//! concurrently, with at most [`MAX_CONCURRENT_WRITES`] writes in flight.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Upper bound on concurrent file writes during extraction.
pub const MAX_CONCURRENT_WRITES: usize = 10;

/// Largest buffer reserved up front for an entry, whatever its header claims.
#[cfg(feature = "archive")]
const MAX_ENTRY_PREALLOC: u64 = 1 << 20;

/// Errors that can occur while packing or unpacking archives.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Source directory does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("Archive is corrupt or unreadable: {0}")]
    Corrupt(String),

    #[error("Archive entry escapes the destination directory: {0}")]
    UnsafeEntry(PathBuf),

    #[error("Archive support is not compiled into this build")]
    Unavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Compresses directories to archives and back.
#[derive(Debug, Clone)]
pub struct ArchiveCodec {
    max_concurrent_writes: usize,
}

impl Default for ArchiveCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveCodec {
    pub fn new() -> Self {
        Self {
            max_concurrent_writes: MAX_CONCURRENT_WRITES,
        }
    }

    /// Override the extraction concurrency limit (minimum 1).
    pub fn with_max_concurrent_writes(mut self, limit: usize) -> Self {
        self.max_concurrent_writes = limit.max(1);
        self
    }

    /// Whether archive support was compiled in.
    pub const fn is_available() -> bool {
        cfg!(feature = "archive")
    }

    /// Pack every entry under `source_dir` into a new archive at `archive_path`.
    ///
    /// Any existing file at `archive_path` is replaced.
    pub async fn compress(&self, source_dir: &Path, archive_path: &Path) -> Result<PathBuf> {
        if !tokio::fs::try_exists(source_dir).await.unwrap_or(false) {
            return Err(ArchiveError::SourceMissing(source_dir.to_path_buf()));
        }

        let source = source_dir.to_path_buf();
        let target = archive_path.to_path_buf();
        tokio::task::spawn_blocking(move || imp::pack(&source, &target))
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))??;

        tracing::debug!(archive = %archive_path.display(), "Archive written");
        Ok(archive_path.to_path_buf())
    }

    /// Unpack `archive_path` into `dest_dir`, then delete the archive.
    ///
    /// On failure `dest_dir` may be left partially populated and the archive
    /// is kept.
    pub async fn decompress(&self, archive_path: &Path, dest_dir: &Path) -> Result<()> {
        imp::unpack(archive_path, dest_dir, self.max_concurrent_writes).await?;
        tokio::fs::remove_file(archive_path).await?;
        tracing::debug!(dest = %dest_dir.display(), "Archive extracted");
        Ok(())
    }
}

/// Normalize an entry path, rejecting anything that could leave the
/// destination directory.
fn sanitize_entry_path(path: &Path) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(ArchiveError::UnsafeEntry(path.to_path_buf())),
        }
    }
    Ok(clean)
}

#[cfg(feature = "archive")]
mod imp {
    use std::fs::File;
    use std::future::Future;
    use std::io::Read;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use flate2::read::GzDecoder;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tokio::sync::{mpsc, Semaphore};
    use tokio::task::JoinSet;
    use walkdir::WalkDir;

    use super::{sanitize_entry_path, ArchiveError, Result, MAX_ENTRY_PREALLOC};

    /// A decoded archive entry ready to be materialized.
    enum Entry {
        Dir(PathBuf),
        File { path: PathBuf, data: Vec<u8> },
    }

    pub(super) fn pack(source: &Path, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(target)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.mode(tar::HeaderMode::Deterministic);
        builder.follow_symlinks(false);

        for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| ArchiveError::Io(e.into()))?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| ArchiveError::Task(e.to_string()))?;

            let file_type = entry.file_type();
            if file_type.is_dir() {
                builder.append_dir(relative, entry.path())?;
            } else if file_type.is_file() {
                builder.append_path_with_name(entry.path(), relative)?;
            }
        }

        builder.into_inner()?.finish()?;
        Ok(())
    }

    /// Decode entries on a blocking thread and feed them through `tx`.
    fn read_entries(archive_path: &Path, tx: mpsc::Sender<Result<Entry>>) -> Result<()> {
        let file = File::open(archive_path)?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let entries = archive
            .entries()
            .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;

        for entry in entries {
            let decoded = entry
                .map_err(|e| ArchiveError::Corrupt(e.to_string()))
                .and_then(|mut entry| {
                    let raw = entry
                        .path()
                        .map_err(|e| ArchiveError::Corrupt(e.to_string()))?
                        .into_owned();
                    let path = sanitize_entry_path(&raw)?;
                    let kind = entry.header().entry_type();

                    if path.as_os_str().is_empty() {
                        Ok(None)
                    } else if kind.is_dir() {
                        Ok(Some(Entry::Dir(path)))
                    } else if kind.is_file() {
                        let declared = entry.size();
                        let mut data = Vec::with_capacity(declared.min(MAX_ENTRY_PREALLOC) as usize);
                        entry
                            .read_to_end(&mut data)
                            .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
                        if data.len() as u64 != declared {
                            return Err(ArchiveError::Corrupt(format!(
                                "entry {} is truncated: header declares {} bytes, found {}",
                                path.display(),
                                declared,
                                data.len()
                            )));
                        }
                        Ok(Some(Entry::File { path, data }))
                    } else {
                        Ok(None)
                    }
                });

            match decoded {
                Ok(Some(item)) => {
                    if tx.blocking_send(Ok(item)).is_err() {
                        // Receiver gave up after a write failure.
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    pub(super) async fn unpack(archive_path: &Path, dest_dir: &Path, limit: usize) -> Result<()> {
        unpack_with(archive_path, dest_dir, limit, write_file).await
    }

    async fn write_file(target: PathBuf, data: Vec<u8>) -> std::io::Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, data).await
    }

    /// Unpack with `write` materializing each file, at most `limit` at a time.
    pub(super) async fn unpack_with<W, Fut>(
        archive_path: &Path,
        dest_dir: &Path,
        limit: usize,
        write: W,
    ) -> Result<()>
    where
        W: Fn(PathBuf, Vec<u8>) -> Fut,
        Fut: Future<Output = std::io::Result<()>> + Send + 'static,
    {
        tokio::fs::create_dir_all(dest_dir).await?;

        let (tx, mut rx) = mpsc::channel::<Result<Entry>>(limit * 2);
        let source = archive_path.to_path_buf();
        let reader = tokio::task::spawn_blocking(move || read_entries(&source, tx));

        let semaphore = Arc::new(Semaphore::new(limit));
        let mut writes: JoinSet<std::io::Result<()>> = JoinSet::new();
        let mut failure: Option<ArchiveError> = None;

        while let Some(item) = rx.recv().await {
            match item {
                Ok(Entry::Dir(path)) => {
                    if let Err(e) = tokio::fs::create_dir_all(dest_dir.join(path)).await {
                        failure = Some(e.into());
                        break;
                    }
                }
                Ok(Entry::File { path, data }) => {
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|e| ArchiveError::Task(e.to_string()))?;
                    let pending = write(dest_dir.join(path), data);
                    writes.spawn(async move {
                        let _permit = permit;
                        pending.await
                    });
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }

            // Surface write failures early instead of after the whole archive.
            while let Some(done) = writes.try_join_next() {
                if let Err(e) = flatten_write(done) {
                    failure.get_or_insert(e);
                }
            }
            if failure.is_some() {
                break;
            }
        }
        drop(rx);

        while let Some(done) = writes.join_next().await {
            if let Err(e) = flatten_write(done) {
                failure.get_or_insert(e);
            }
        }

        let read_result = reader
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))?;

        match failure {
            Some(e) => Err(e),
            None => read_result,
        }
    }

    fn flatten_write(
        done: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
    ) -> Result<()> {
        match done {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ArchiveError::Io(e)),
            Err(e) => Err(ArchiveError::Task(e.to_string())),
        }
    }
}

#[cfg(not(feature = "archive"))]
mod imp {
    use std::path::Path;

    use super::{ArchiveError, Result};

    pub(super) fn pack(_source: &Path, _target: &Path) -> Result<()> {
        Err(ArchiveError::Unavailable)
    }

    pub(super) async fn unpack(_archive: &Path, _dest: &Path, _limit: usize) -> Result<()> {
        Err(ArchiveError::Unavailable)
    }
}

#[cfg(all(test, feature = "archive"))]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn test_compress_and_decompress() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        write(&source.join("a.txt"), "alpha");
        write(&source.join("nested/deeper/b.bin"), "beta");
        fs::create_dir_all(source.join("empty")).unwrap();

        let codec = ArchiveCodec::new();
        let archive = tmp.path().join("out/session.tar.gz");
        let written = codec.compress(&source, &archive).await.unwrap();
        assert_eq!(written, archive);
        assert!(archive.exists());

        let dest = tmp.path().join("dest");
        codec.decompress(&archive, &dest).await.unwrap();

        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "alpha");
        assert_eq!(
            fs::read_to_string(dest.join("nested/deeper/b.bin")).unwrap(),
            "beta"
        );
        assert!(dest.join("empty").is_dir());
        assert!(!archive.exists(), "archive should be deleted after extraction");
    }

    #[tokio::test]
    async fn test_compress_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        for i in 0..20 {
            write(&source.join(format!("dir{}/file{}.txt", i % 3, i)), &i.to_string());
        }

        let codec = ArchiveCodec::new();
        let first = tmp.path().join("first.tar.gz");
        let second = tmp.path().join("second.tar.gz");
        codec.compress(&source, &first).await.unwrap();
        codec.compress(&source, &second).await.unwrap();

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[tokio::test]
    async fn test_compress_missing_source() {
        let tmp = TempDir::new().unwrap();
        let result = ArchiveCodec::new()
            .compress(&tmp.path().join("missing"), &tmp.path().join("x.tar.gz"))
            .await;
        assert!(matches!(result, Err(ArchiveError::SourceMissing(_))));
    }

    #[tokio::test]
    async fn test_decompress_corrupt_archive_keeps_file() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("broken.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();

        let result = ArchiveCodec::new()
            .decompress(&archive, &tmp.path().join("dest"))
            .await;
        assert!(matches!(result, Err(ArchiveError::Corrupt(_))));
        assert!(archive.exists());
    }

    #[tokio::test]
    async fn test_decompress_missing_archive() {
        let tmp = TempDir::new().unwrap();
        let result = ArchiveCodec::new()
            .decompress(&tmp.path().join("nope.tar.gz"), &tmp.path().join("dest"))
            .await;
        assert!(matches!(result, Err(ArchiveError::Io(_))));
    }

    #[tokio::test]
    async fn test_decompress_with_single_writer() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        for i in 0..25 {
            write(&source.join(format!("f{}.txt", i)), &"x".repeat(i));
        }

        let codec = ArchiveCodec::new().with_max_concurrent_writes(1);
        let archive = tmp.path().join("a.tar.gz");
        codec.compress(&source, &archive).await.unwrap();
        codec.decompress(&archive, &tmp.path().join("dest")).await.unwrap();

        for i in 0..25 {
            let restored = fs::read_to_string(tmp.path().join(format!("dest/f{}.txt", i))).unwrap();
            assert_eq!(restored.len(), i);
        }
    }

    #[tokio::test]
    async fn test_decompress_rejects_oversized_entry_header() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("forged.tar.gz");

        let mut header = tar::Header::new_gnu();
        header.set_path("Default/huge.bin").unwrap();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(1 << 44);
        header.set_cksum();

        let mut encoder = GzEncoder::new(fs::File::create(&archive).unwrap(), Compression::default());
        encoder.write_all(header.as_bytes()).unwrap();
        encoder.write_all(&[7u8; 1024]).unwrap();
        encoder.finish().unwrap();

        let result = ArchiveCodec::new()
            .decompress(&archive, &tmp.path().join("dest"))
            .await;
        assert!(matches!(result, Err(ArchiveError::Corrupt(_))), "{:?}", result);
        assert!(archive.exists());
    }

    #[tokio::test]
    async fn test_unpack_respects_write_limit() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        for i in 0..40 {
            write(&source.join(format!("dir{}/f{}.txt", i % 4, i)), &i.to_string());
        }
        let archive = tmp.path().join("a.tar.gz");
        ArchiveCodec::new().compress(&source, &archive).await.unwrap();

        for limit in [MAX_CONCURRENT_WRITES, 3] {
            let in_flight = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let dest = tmp.path().join(format!("dest{}", limit));

            let writer = {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                move |target: PathBuf, data: Vec<u8>| {
                    let in_flight = in_flight.clone();
                    let peak = peak.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        tokio::fs::create_dir_all(target.parent().unwrap()).await?;
                        let result = tokio::fs::write(&target, data).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        result
                    }
                }
            };
            imp::unpack_with(&archive, &dest, limit, writer).await.unwrap();

            let peak = peak.load(Ordering::SeqCst);
            assert!(peak <= limit, "peak {} exceeded limit {}", peak, limit);
            assert!(peak > 1, "writes should overlap");
            for i in 0..40 {
                let restored = fs::read_to_string(dest.join(format!("dir{}/f{}.txt", i % 4, i))).unwrap();
                assert_eq!(restored, i.to_string());
            }
        }
    }

    #[test]
    fn test_sanitize_entry_path() {
        assert_eq!(
            sanitize_entry_path(Path::new("./Default/Cookies")).unwrap(),
            PathBuf::from("Default/Cookies")
        );
        assert!(sanitize_entry_path(Path::new(".")).unwrap().as_os_str().is_empty());
        assert!(matches!(
            sanitize_entry_path(Path::new("../escape")),
            Err(ArchiveError::UnsafeEntry(_))
        ));
        assert!(matches!(
            sanitize_entry_path(Path::new("/etc/passwd")),
            Err(ArchiveError::UnsafeEntry(_))
        ));
    }

    #[test]
    fn test_is_available() {
        assert!(ArchiveCodec::is_available());
    }
}
