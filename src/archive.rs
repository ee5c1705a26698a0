// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup archive packaging.
//!
//! A backup is a gzip-compressed tar container holding a whole directory tree.
//! Backups use the `.tt` file extension.
//!
//! # Entry Types
//!
//! Every entry carries an explicit type marker. Only two types are ever
//! written or accepted:
//!
//! - __Directory__ entries are recreated as directories.
//! - __Regular__ entries are recreated as files with their payload.
//!
//! Anything else, e.g., symlinks or device nodes, is rejected on unpack.
//! Entry paths are always relative to the packed directory. Absolute paths
//! and paths that climb out with `..` are rejected as well.
//!
//! # Determinism
//!
//! Packing walks the source tree depth-first with siblings sorted by file
//! name, and headers are written in deterministic mode. Thus, packing the
//! same tree twice yields the same bytes.

use crate::path::DayPath;

use chrono::NaiveDate;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use ignore::WalkBuilder;
use indicatif::ProgressBar;
use std::{
    fs::File,
    io::{self, BufReader},
    path::{Component, Path, PathBuf},
};
use tar::{Archive, Builder, EntryType, HeaderMode};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

/// File extension of backup archives.
pub const EXTENSION: &str = "tt";

/// Default backup file name for target date, e.g., `2024-03-05_backup.tt`.
pub fn default_backup_name(today: NaiveDate) -> String {
    format!("{}_backup.{EXTENSION}", DayPath::file_stem(today))
}

/// Tally of entries moved through a pack or unpack.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PackSummary {
    /// Regular files.
    pub files: usize,

    /// Directories.
    pub directories: usize,

    /// Total payload size of regular files.
    pub bytes: u64,
}

/// Packs and unpacks backup archives.
#[derive(Debug, Clone)]
pub struct Packager {
    progress: ProgressBar,
}

impl Default for Packager {
    fn default() -> Self {
        Self::new()
    }
}

impl Packager {
    /// Construct new packager with hidden progress.
    pub fn new() -> Self {
        Self {
            progress: ProgressBar::hidden(),
        }
    }

    /// Report progress through target bar, ticking once per entry.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Pack every directory and regular file under `source` into `archive`.
    ///
    /// The archive is written to a temporary sibling first, and only renamed
    /// into place after the container has been fully written. A failed pack
    /// never leaves a partial archive at the target path. Symlinks are
    /// skipped.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::MissingSource`] if `source` is not a directory.
    /// - Return [`ArchiveError::Walk`] if source tree cannot be walked.
    /// - Return [`ArchiveError::Read`] if a source entry cannot be read.
    /// - Return [`ArchiveError::Write`] if archive cannot be written.
    #[instrument(skip(self, source, archive), level = "debug")]
    pub fn pack(&self, source: impl AsRef<Path>, archive: impl AsRef<Path>) -> Result<PackSummary> {
        let source = source.as_ref();
        let archive = archive.as_ref();
        if !source.is_dir() {
            return Err(ArchiveError::MissingSource {
                path: source.to_path_buf(),
            });
        }

        // INVARIANT: Collect entries before the temporary archive exists.
        //   - Archive may be written somewhere inside source tree.
        let entries = collect_entries(source)?;
        self.progress.set_length(entries.len() as u64);

        let parent = match archive.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        create_dir(parent)?;

        let write_err = |source: io::Error| ArchiveError::Write {
            source,
            path: archive.to_path_buf(),
        };
        let temp = NamedTempFile::new_in(parent).map_err(write_err)?;
        let mut builder = Builder::new(GzEncoder::new(temp, Compression::default()));
        builder.mode(HeaderMode::Deterministic);
        builder.follow_symlinks(false);

        let mut summary = PackSummary::default();
        for entry in &entries {
            self.progress
                .set_message(entry.relative.display().to_string());
            let read_err = |source: io::Error| ArchiveError::Read {
                source,
                path: entry.path.clone(),
            };

            match entry.kind {
                SourceKind::Directory => {
                    builder
                        .append_dir(&entry.relative, &entry.path)
                        .map_err(read_err)?;
                    summary.directories += 1;
                }
                SourceKind::File { len } => {
                    builder
                        .append_path_with_name(&entry.path, &entry.relative)
                        .map_err(read_err)?;
                    summary.files += 1;
                    summary.bytes += len;
                }
            }
            self.progress.inc(1);
        }

        let temp = builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(archive).map_err(|err| write_err(err.error))?;

        info!(
            "packed {} file(s) and {} dir(s) into {:?}",
            summary.files,
            summary.directories,
            archive.display()
        );
        Ok(summary)
    }

    /// Unpack every entry of `archive` beneath `target`.
    ///
    /// Creates `target` if missing. Existing files at the same relative path
    /// are overwritten, all other files are left alone. The first rejected
    /// entry aborts the unpack.
    ///
    /// # Errors
    ///
    /// - Return [`ArchiveError::Read`] if archive cannot be opened.
    /// - Return [`ArchiveError::Corrupt`] if archive cannot be decoded.
    /// - Return [`ArchiveError::UnsafePath`] if an entry escapes `target`.
    /// - Return [`ArchiveError::UnsupportedEntry`] if an entry is neither a
    ///   directory nor a regular file.
    /// - Return [`ArchiveError::CreateDir`] or [`ArchiveError::Write`] if
    ///   entries cannot be written out.
    #[instrument(skip(self, archive, target), level = "debug")]
    pub fn unpack(&self, archive: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<PackSummary> {
        let archive = archive.as_ref();
        let target = target.as_ref();

        let file = File::open(archive).map_err(|source| ArchiveError::Read {
            source,
            path: archive.to_path_buf(),
        })?;
        create_dir(target)?;

        let corrupt = |source: io::Error| ArchiveError::Corrupt {
            source,
            path: archive.to_path_buf(),
        };
        let mut reader = Archive::new(GzDecoder::new(BufReader::new(file)));

        let mut summary = PackSummary::default();
        for entry in reader.entries().map_err(corrupt)? {
            let mut entry = entry.map_err(corrupt)?;
            let name = entry.path().map_err(corrupt)?.into_owned();
            let relative = sanitize(&name)?;
            let dest = target.join(&relative);
            self.progress.set_message(name.display().to_string());

            match entry.header().entry_type() {
                EntryType::Directory => {
                    create_dir(&dest)?;
                    summary.directories += 1;
                }
                EntryType::Regular => {
                    if relative.as_os_str().is_empty() {
                        return Err(ArchiveError::UnsafePath { entry: name });
                    }

                    if let Some(parent) = dest.parent() {
                        create_dir(parent)?;
                    }

                    let write_err = |source: io::Error| ArchiveError::Write {
                        source,
                        path: dest.clone(),
                    };
                    let mut out = File::create(&dest).map_err(write_err)?;
                    summary.bytes += io::copy(&mut entry, &mut out).map_err(write_err)?;
                    summary.files += 1;
                }
                kind => {
                    return Err(ArchiveError::UnsupportedEntry {
                        entry: name,
                        kind: format!("{kind:?}"),
                    })
                }
            }

            debug!("unpacked {:?}", dest.display());
            self.progress.inc(1);
        }

        info!(
            "unpacked {} file(s) and {} dir(s) into {:?}",
            summary.files,
            summary.directories,
            target.display()
        );
        Ok(summary)
    }
}

/// Pack `source` into `archive` without progress reporting.
///
/// # Errors
///
/// - Return [`ArchiveError`] for any failure, see [`Packager::pack`].
pub fn pack(source: impl AsRef<Path>, archive: impl AsRef<Path>) -> Result<PackSummary> {
    Packager::new().pack(source, archive)
}

/// Unpack `archive` into `target` without progress reporting.
///
/// # Errors
///
/// - Return [`ArchiveError`] for any failure, see [`Packager::unpack`].
pub fn unpack(archive: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<PackSummary> {
    Packager::new().unpack(archive, target)
}

#[derive(Debug)]
struct SourceEntry {
    path: PathBuf,
    relative: PathBuf,
    kind: SourceKind,
}

#[derive(Debug, Clone, Copy)]
enum SourceKind {
    Directory,
    File { len: u64 },
}

fn collect_entries(source: &Path) -> Result<Vec<SourceEntry>> {
    let walker = WalkBuilder::new(source)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }

        let path = entry.path().to_path_buf();
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        let kind = if file_type.is_dir() {
            SourceKind::Directory
        } else if file_type.is_file() {
            let metadata = entry.metadata()?;
            SourceKind::File {
                len: metadata.len(),
            }
        } else {
            warn!("skip non-regular file {:?}", path.display());
            continue;
        };

        let relative = path
            .strip_prefix(source)
            .map_err(|_| ArchiveError::UnsafePath {
                entry: path.clone(),
            })?
            .to_path_buf();

        entries.push(SourceEntry {
            path,
            relative,
            kind,
        });
    }

    Ok(entries)
}

/// Reduce entry path to plain relative components.
fn sanitize(name: &Path) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::UnsafePath {
                    entry: name.to_path_buf(),
                })
            }
        }
    }

    Ok(relative)
}

fn create_dir(path: &Path) -> Result<()> {
    mkdirp::mkdirp(path).map_err(|source| ArchiveError::CreateDir {
        source,
        path: path.to_path_buf(),
    })?;

    Ok(())
}

/// Archive packaging error types.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Directory to pack does not exist.
    #[error("cannot pack {:?}, not a directory", path.display())]
    MissingSource { path: PathBuf },

    /// Source tree cannot be walked.
    #[error(transparent)]
    Walk(#[from] ignore::Error),

    /// File cannot be read from.
    #[error("failed to read from {:?}", path.display())]
    Read {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// File cannot be written to.
    #[error("failed to write to {:?}", path.display())]
    Write {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Directory cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Archive is not a readable gzip-compressed tar container.
    #[error("archive {:?} is corrupt", path.display())]
    Corrupt {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Entry is neither a directory nor a regular file.
    #[error("archive entry {:?} has unsupported type {kind}", entry.display())]
    UnsupportedEntry { entry: PathBuf, kind: String },

    /// Entry path is absolute or escapes the target directory.
    #[error("archive entry {:?} has unsafe path", entry.display())]
    UnsafePath { entry: PathBuf },
}

impl ArchiveError {
    /// Error stems from archive content rather than from I/O.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::Corrupt { .. } | Self::UnsupportedEntry { .. } | Self::UnsafePath { .. }
        )
    }
}

/// Friendly result alias :3
pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{
        collections::BTreeMap,
        fs::{create_dir_all, read, read_dir, write},
    };
    use tar::Header;
    use tempfile::TempDir;

    /// Relative path to file content, `None` for directories.
    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
        fn visit(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Option<Vec<u8>>>) {
            for entry in read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                let relative = path.strip_prefix(root).unwrap().to_path_buf();
                if path.is_dir() {
                    out.insert(relative, None);
                    visit(root, &path, out);
                } else {
                    out.insert(relative, Some(read(&path).unwrap()));
                }
            }
        }

        let mut out = BTreeMap::new();
        visit(root, root, &mut out);
        out
    }

    fn sample_tree(root: &Path) -> anyhow::Result<()> {
        create_dir_all(root.join("2024/03"))?;
        create_dir_all(root.join("2025/01"))?;
        create_dir_all(root.join("empty"))?;
        write(root.join("projectlist.txt"), "Acme\nInternal\n")?;
        write(
            root.join("2024/03/2024-03-05.txt"),
            "Acme;;;Fix bug;;;1700000000000;;;1700003600000;;;\n",
        )?;
        write(root.join("2025/01/2025-01-01.txt"), "")?;
        write(root.join(".hidden"), "still packed")?;
        Ok(())
    }

    fn craft_archive(path: &Path, header: &Header, data: &[u8]) -> anyhow::Result<()> {
        let encoder = GzEncoder::new(File::create(path)?, Compression::default());
        let mut builder = Builder::new(encoder);
        builder.append(header, data)?;
        builder.into_inner()?.finish()?;
        Ok(())
    }

    #[test]
    fn pack_then_unpack_restores_tree() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        let target = TempDir::new()?;
        let scratch = TempDir::new()?;
        sample_tree(source.path())?;
        let archive = scratch.path().join("backup.tt");

        let packed = pack(source.path(), &archive)?;
        let unpacked = unpack(&archive, target.path().join("restored"))?;

        assert_eq!(packed, unpacked);
        assert_eq!(
            packed,
            PackSummary {
                files: 4,
                directories: 5,
                bytes: 76,
            }
        );
        assert_eq!(
            snapshot(&target.path().join("restored")),
            snapshot(source.path())
        );

        Ok(())
    }

    #[test]
    fn long_entry_names_round_trip() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        let target = TempDir::new()?;
        let nested = PathBuf::from("a".repeat(60)).join("b".repeat(60));
        let file = nested.join(format!("{}.txt", "c".repeat(80)));
        assert!(file.as_os_str().len() > 100);
        create_dir_all(source.path().join(&nested))?;
        write(source.path().join(&file), "long name payload\n")?;

        let archive = target.path().join("long.tt");
        let packed = pack(source.path(), &archive)?;
        let unpacked = unpack(&archive, target.path().join("restored"))?;

        assert_eq!(packed, unpacked);
        assert_eq!(packed.files, 1);
        assert_eq!(
            read(target.path().join("restored").join(&file))?,
            b"long name payload\n"
        );
        assert_eq!(
            snapshot(&target.path().join("restored")),
            snapshot(source.path())
        );

        Ok(())
    }

    #[test]
    fn empty_tree_round_trips() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        let target = TempDir::new()?;
        let archive = target.path().join("empty.tt");

        assert_eq!(pack(source.path(), &archive)?, PackSummary::default());
        assert_eq!(
            unpack(&archive, target.path().join("out"))?,
            PackSummary::default()
        );
        assert!(target.path().join("out").is_dir());

        Ok(())
    }

    #[test]
    fn pack_is_deterministic() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        let scratch = TempDir::new()?;
        sample_tree(source.path())?;

        pack(source.path(), scratch.path().join("first.tt"))?;
        pack(source.path(), scratch.path().join("second.tt"))?;

        assert_eq!(
            read(scratch.path().join("first.tt"))?,
            read(scratch.path().join("second.tt"))?
        );

        Ok(())
    }

    #[test]
    fn unpack_overwrites_only_matching_files() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        let target = TempDir::new()?;
        let scratch = TempDir::new()?;
        write(source.path().join("projectlist.txt"), "Acme\n")?;
        write(target.path().join("projectlist.txt"), "Old\n")?;
        write(target.path().join("keep.txt"), "kept")?;
        let archive = scratch.path().join("backup.tt");

        pack(source.path(), &archive)?;
        unpack(&archive, target.path())?;

        assert_eq!(read(target.path().join("projectlist.txt"))?, b"Acme\n");
        assert_eq!(read(target.path().join("keep.txt"))?, b"kept");

        Ok(())
    }

    #[test]
    fn unpack_rejects_parent_traversal() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let archive = scratch.path().join("evil.tt");

        let mut header = Header::new_gnu();
        let name = b"../evil.txt";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(4);
        header.set_cksum();
        craft_archive(&archive, &header, b"evil")?;

        let result = unpack(&archive, scratch.path().join("out"));
        assert!(matches!(result, Err(ArchiveError::UnsafePath { .. })));
        assert!(!scratch.path().join("evil.txt").exists());

        Ok(())
    }

    #[test]
    fn unpack_rejects_symlink_entries() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let archive = scratch.path().join("link.tt");

        let mut header = Header::new_gnu();
        header.set_path("link")?;
        header.set_link_name("/etc/passwd")?;
        header.set_entry_type(EntryType::Symlink);
        header.set_mode(0o777);
        header.set_size(0);
        header.set_cksum();
        craft_archive(&archive, &header, &[])?;

        let result = unpack(&archive, scratch.path().join("out"));
        assert!(matches!(
            result,
            Err(ArchiveError::UnsupportedEntry { .. })
        ));
        assert!(result.unwrap_err().is_format_error());

        Ok(())
    }

    #[test]
    fn unpack_rejects_garbage() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let archive = scratch.path().join("garbage.tt");
        write(&archive, "this is not a gzip stream")?;

        let result = unpack(&archive, scratch.path().join("out"));
        assert!(matches!(result, Err(ArchiveError::Corrupt { .. })));

        Ok(())
    }

    #[test]
    fn failed_pack_keeps_previous_archive() -> anyhow::Result<()> {
        let scratch = TempDir::new()?;
        let archive = scratch.path().join("backup.tt");
        write(&archive, "previous")?;

        let result = pack(scratch.path().join("missing"), &archive);

        assert!(matches!(result, Err(ArchiveError::MissingSource { .. })));
        assert_eq!(read(&archive)?, b"previous");
        assert_eq!(read_dir(scratch.path())?.count(), 1);

        Ok(())
    }

    #[test]
    fn backup_name_uses_padded_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(default_backup_name(date), "2024-03-05_backup.tt");
    }
}
