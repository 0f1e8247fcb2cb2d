//! Streaming extraction of package archives.
//!
//! # Invariants
//! - Output paths mirror archive paths exactly, rooted at the target dir.
//! - No entry is written outside the target dir: links, absolute paths and
//!   `..` components are refused.
//! - Entry bytes go through one fixed-size buffer.

use super::archive::{EntryKind, PackageArchive, Visit};
use super::{LoaderError, LoaderResult};
use log::{debug, info};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

const EXTRACT_BUFFER_SIZE: usize = 8 * 1024;

/// Totals of one extraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Unpacks every regular file of `archive` under `root`.
///
/// Directory entries are skipped; directories appear as files are written.
/// A failure leaves whatever was already written in place.
pub fn extract_package<A>(archive: &A, root: &Path) -> LoaderResult<ExtractionSummary>
where
    A: PackageArchive + ?Sized,
{
    let started_at = Instant::now();
    let mut summary = ExtractionSummary::default();
    let mut buffer = vec![0u8; EXTRACT_BUFFER_SIZE];

    archive.visit_entries(&mut |mut entry| {
        match entry.kind() {
            EntryKind::File => {}
            EntryKind::Directory => return Ok(Visit::Continue),
            EntryKind::Link => {
                return Err(LoaderError::unsafe_entry(
                    entry.path(),
                    "links are not extracted",
                ))
            }
            EntryKind::Other => {
                debug!(
                    "event=extract_skip module=package status=ok entry={}",
                    entry.path()
                );
                return Ok(Visit::Continue);
            }
        }

        let dest = root.join(safe_relative_path(entry.path())?);
        if let Some(parent) = dest.parent() {
            ensure_dir(parent)?;
        }
        let written = stream_to_file(entry.reader(), archive.location(), &dest, &mut buffer)?;
        summary.files += 1;
        summary.bytes += written;
        Ok(Visit::Continue)
    })?;

    info!(
        "event=package_extract module=package status=ok files={} bytes={} duration_ms={} root={}",
        summary.files,
        summary.bytes,
        started_at.elapsed().as_millis(),
        root.display()
    );
    Ok(summary)
}

/// Converts an archive path into a relative path that stays inside its root.
pub(crate) fn safe_relative_path(path: &str) -> LoaderResult<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(LoaderError::unsafe_entry(path, "path traversal (..)"))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(LoaderError::unsafe_entry(path, "absolute path"))
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(LoaderError::unsafe_entry(path, "empty path"));
    }
    Ok(relative)
}

fn ensure_dir(dir: &Path) -> LoaderResult<()> {
    match fs::create_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(_) if dir.is_dir() => Ok(()),
        Err(err) => Err(LoaderError::io(dir, err)),
    }
}

fn stream_to_file(
    reader: &mut dyn Read,
    source: &Path,
    dest: &Path,
    buffer: &mut [u8],
) -> LoaderResult<u64> {
    let mut file = File::create(dest).map_err(|err| LoaderError::io(dest, err))?;
    let mut written = 0u64;
    loop {
        let read = reader
            .read(buffer)
            .map_err(|err| LoaderError::io(source, err))?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .map_err(|err| LoaderError::io(dest, err))?;
        written += read as u64;
    }
    file.flush().map_err(|err| LoaderError::io(dest, err))?;
    Ok(written)
}
