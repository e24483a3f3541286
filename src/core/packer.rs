//! Archive packer.
//!
//! Packs a directory tree into zip archives written next to it
//! (`{dir}.zip`, `{dir}.part2.zip`, ...). Every source file is deleted as
//! soon as it has been written into its archive, so peak disk usage stays
//! around one copy of the tree.
//!
//! Two modes:
//! - single: everything into `{dir}.zip`
//! - split: files are bin-packed in traversal order into archives whose
//!   uncompressed content stays under a size cap. A file bigger than the
//!   cap gets an archive of its own; files are never cut.
//!
//! Zip writing is blocking and runs on tokio's blocking pool.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domain::{ArchivePart, Artifact};

/// Zip64 is needed once a single entry reaches 4 GiB
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Errors while packing
#[derive(Debug, Error)]
pub enum PackError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Packing worker failed: {0}")]
    Worker(String),
}

/// Path that archives for `dir` are named after (trailing separators removed)
pub fn archive_base(dir: &Path) -> PathBuf {
    match (dir.parent(), dir.file_name()) {
        (Some(parent), Some(name)) => parent.join(name),
        _ => dir.to_path_buf(),
    }
}

/// `base.zip` for part 1, `base.partN.zip` after that
pub fn part_path(base: &Path, part: usize) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    if part <= 1 {
        name.push(".zip");
    } else {
        name.push(format!(".part{}.zip", part));
    }
    PathBuf::from(name)
}

/// Archives currently on disk for `dir`, including partially written ones
pub fn existing_archives(dir: &Path) -> Vec<PathBuf> {
    let base = archive_base(dir);
    let escaped = glob::Pattern::escape(&base.to_string_lossy());

    let mut found = Vec::new();
    for pattern in [format!("{}.zip", escaped), format!("{}.part*.zip", escaped)] {
        if let Ok(paths) = glob::glob(&pattern) {
            found.extend(paths.flatten());
        }
    }
    found
}

/// Pack `source_dir` into a single `{dir}.zip`
pub async fn pack_single(source_dir: &Path) -> Result<Artifact, PackError> {
    let dir = source_dir.to_path_buf();
    tokio::task::spawn_blocking(move || pack_single_blocking(&dir))
        .await
        .map_err(|e| PackError::Worker(e.to_string()))?
}

/// Pack `source_dir` into archives of at most `max_size` content bytes each
pub async fn pack_split(source_dir: &Path, max_size: u64) -> Result<Artifact, PackError> {
    let dir = source_dir.to_path_buf();
    tokio::task::spawn_blocking(move || pack_split_blocking(&dir, max_size))
        .await
        .map_err(|e| PackError::Worker(e.to_string()))?
}

pub fn pack_single_blocking(source_dir: &Path) -> Result<Artifact, PackError> {
    let files = collect_files(source_dir)?;
    let mut writer = PartWriter::create(part_path(&archive_base(source_dir), 1))?;

    for file in &files {
        writer.add(file)?;
    }

    let part = writer.finish()?;
    info!(
        archive = %part.path.display(),
        files = part.file_count,
        bytes = part.size_bytes,
        "Packed single archive"
    );
    Ok(Artifact { parts: vec![part] })
}

pub fn pack_split_blocking(source_dir: &Path, max_size: u64) -> Result<Artifact, PackError> {
    let files = collect_files(source_dir)?;
    let base = archive_base(source_dir);

    let mut parts = Vec::new();
    let mut current: Option<PartWriter> = None;

    for file in &files {
        let seal = current
            .as_ref()
            .map_or(false, |w| w.size_bytes + file.size > max_size);
        if seal {
            if let Some(writer) = current.take() {
                parts.push(writer.finish()?);
            }
        }

        if current.is_none() {
            current = Some(PartWriter::create(part_path(&base, parts.len() + 1))?);
        }
        if let Some(writer) = current.as_mut() {
            writer.add(file)?;
        }
    }

    if let Some(writer) = current.take() {
        parts.push(writer.finish()?);
    }

    info!(
        source = %source_dir.display(),
        parts = parts.len(),
        max_size,
        "Packed split archives"
    );
    Ok(Artifact { parts })
}

/// A regular file found in the source tree
struct SourceFile {
    path: PathBuf,
    /// Name inside the archive, relative to the tree root with `/` separators
    name: String,
    size: u64,
}

fn collect_files(root: &Path) -> Result<Vec<SourceFile>, PackError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        files.push(SourceFile {
            path: entry.path().to_path_buf(),
            name,
            size: entry.metadata()?.len(),
        });
    }

    Ok(files)
}

/// One archive being written
struct PartWriter {
    path: PathBuf,
    writer: ZipWriter<File>,
    size_bytes: u64,
    file_count: usize,
}

impl PartWriter {
    fn create(path: PathBuf) -> Result<Self, PackError> {
        debug!(archive = %path.display(), "Opening archive");
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: ZipWriter::new(file),
            size_bytes: 0,
            file_count: 0,
        })
    }

    /// Write `file` into the archive, then delete it from the tree
    fn add(&mut self, file: &SourceFile) -> Result<(), PackError> {
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(file.size >= ZIP64_THRESHOLD);

        self.writer.start_file(file.name.as_str(), options)?;
        let mut source = File::open(&file.path)?;
        io::copy(&mut source, &mut self.writer)?;
        drop(source);
        fs::remove_file(&file.path)?;

        self.size_bytes += file.size;
        self.file_count += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<ArchivePart, PackError> {
        self.writer.finish()?;
        Ok(ArchivePart {
            path: self.path,
            size_bytes: self.size_bytes,
            file_count: self.file_count,
        })
    }
}
