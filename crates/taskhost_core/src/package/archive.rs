//! Package archive access.
//!
//! Packages are tar archives, gzip-compressed or plain. Entries are streamed
//! one at a time; nothing here buffers a whole archive or a whole entry.

use super::{LoaderError, LoaderResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Kind of one archive entry, as far as extraction cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    /// Symbolic or hard link.
    Link,
    Other,
}

impl From<EntryType> for EntryKind {
    fn from(value: EntryType) -> Self {
        if value.is_dir() {
            Self::Directory
        } else if value.is_symlink() || value.is_hard_link() {
            Self::Link
        } else if value.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }
}

/// One entry handed to an archive visitor, with its content stream.
pub struct ArchiveEntry<'a> {
    path: String,
    kind: EntryKind,
    reader: &'a mut dyn Read,
}

impl<'a> ArchiveEntry<'a> {
    pub fn new(path: impl Into<String>, kind: EntryKind, reader: &'a mut dyn Read) -> Self {
        let mut path = normalize_entry_path(&path.into());
        if kind == EntryKind::Directory && !path.ends_with('/') {
            path.push('/');
        }
        Self { path, kind, reader }
    }

    /// Entry path relative to the archive root, without a leading `./`.
    /// Directory paths always end in `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn reader(&mut self) -> &mut dyn Read {
        self.reader
    }
}

/// Visitor verdict after each entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

/// Readable package source.
pub trait PackageArchive: Send + Sync {
    /// Single addressable location of the whole archive.
    fn location(&self) -> &Path;

    /// Streams entries in archive order until the visitor stops or fails.
    ///
    /// The underlying stream is closed before this returns, on every path.
    fn visit_entries(
        &self,
        visitor: &mut dyn FnMut(ArchiveEntry<'_>) -> LoaderResult<Visit>,
    ) -> LoaderResult<()>;
}

/// Tar package on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarPackage {
    path: PathBuf,
}

impl TarPackage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open_stream(&self) -> LoaderResult<Box<dyn Read>> {
        let mut file = File::open(&self.path).map_err(|err| LoaderError::io(&self.path, err))?;

        let mut magic = Vec::with_capacity(GZIP_MAGIC.len());
        (&mut file)
            .take(GZIP_MAGIC.len() as u64)
            .read_to_end(&mut magic)
            .map_err(|err| LoaderError::io(&self.path, err))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|err| LoaderError::io(&self.path, err))?;

        let reader = BufReader::new(file);
        if magic == GZIP_MAGIC {
            Ok(Box::new(GzDecoder::new(reader)))
        } else {
            Ok(Box::new(reader))
        }
    }
}

impl PackageArchive for TarPackage {
    fn location(&self) -> &Path {
        &self.path
    }

    fn visit_entries(
        &self,
        visitor: &mut dyn FnMut(ArchiveEntry<'_>) -> LoaderResult<Visit>,
    ) -> LoaderResult<()> {
        let mut archive = Archive::new(self.open_stream()?);
        let entries = archive
            .entries()
            .map_err(|err| LoaderError::io(&self.path, err))?;

        for entry in entries {
            let mut entry = entry.map_err(|err| LoaderError::io(&self.path, err))?;
            let path = entry
                .path()
                .map_err(|err| LoaderError::io(&self.path, err))?
                .to_string_lossy()
                .into_owned();
            let kind = EntryKind::from(entry.header().entry_type());

            if visitor(ArchiveEntry::new(path, kind, &mut entry))? == Visit::Stop {
                break;
            }
        }
        Ok(())
    }
}

/// Writes gzip-compressed tar packages.
///
/// Hosts use it to assemble packages (and the dependency archives nested in
/// their `lib/` directory) from in-memory content.
pub struct PackageWriter {
    path: PathBuf,
    builder: Builder<GzEncoder<File>>,
}

impl PackageWriter {
    pub fn create(path: impl Into<PathBuf>) -> LoaderResult<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|err| LoaderError::io(&path, err))?;
        let builder = Builder::new(GzEncoder::new(file, Compression::default()));
        Ok(Self { path, builder })
    }

    pub fn add_dir(&mut self, entry_path: &str) -> LoaderResult<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        self.builder
            .append_data(&mut header, entry_path, std::io::empty())
            .map_err(|err| LoaderError::io(&self.path, err))
    }

    pub fn add_file(&mut self, entry_path: &str, contents: &[u8]) -> LoaderResult<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(contents.len() as u64);
        self.builder
            .append_data(&mut header, entry_path, contents)
            .map_err(|err| LoaderError::io(&self.path, err))
    }

    pub fn finish(self) -> LoaderResult<TarPackage> {
        let Self { path, builder } = self;
        let encoder = builder
            .into_inner()
            .map_err(|err| LoaderError::io(&path, err))?;
        encoder.finish().map_err(|err| LoaderError::io(&path, err))?;
        Ok(TarPackage::new(path))
    }
}

/// Writes a package holding `files` at `path`.
pub fn write_package(
    path: impl Into<PathBuf>,
    files: &[(&str, &[u8])],
) -> LoaderResult<TarPackage> {
    let mut writer = PackageWriter::create(path)?;
    for (entry_path, contents) in files {
        writer.add_file(entry_path, contents)?;
    }
    writer.finish()
}

fn normalize_entry_path(raw: &str) -> String {
    let mut path = raw;
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }
    path.to_string()
}
