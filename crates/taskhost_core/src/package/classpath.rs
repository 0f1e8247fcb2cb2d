//! Ordered code locations of one package.
//!
//! # Invariants
//! - Earlier entries shadow later ones.
//! - Each archive entry is scanned for names at most once per classpath;
//!   afterwards only archives known to hold a resource are opened.
//! - Read failures of the package itself are errors. Only bundled library
//!   files that cannot be read are skipped.

use super::archive::{PackageArchive, TarPackage, Visit};
use super::extract::safe_relative_path;
use super::{LoaderError, LoaderResult};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File suffix of compiled class resources.
pub const CLASS_FILE_SUFFIX: &str = ".class";

/// One searchable code location.
#[derive(Clone)]
pub enum ClassPathEntry {
    /// Unpacked tree; resources are files below it.
    Directory(PathBuf),
    /// Bundled library file; resources are entries inside it. Unreadable
    /// libraries are skipped.
    Archive(PathBuf),
    /// The package itself, read through the caller's archive source.
    Package(Arc<dyn PackageArchive>),
}

impl ClassPathEntry {
    pub fn path(&self) -> &Path {
        match self {
            Self::Directory(path) | Self::Archive(path) => path,
            Self::Package(archive) => archive.location(),
        }
    }
}

impl Debug for ClassPathEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Directory(path) => f.debug_tuple("Directory").field(path).finish(),
            Self::Archive(path) => f.debug_tuple("Archive").field(path).finish(),
            Self::Package(archive) => f
                .debug_tuple("Package")
                .field(&archive.location())
                .finish(),
        }
    }
}

impl PartialEq for ClassPathEntry {
    /// `Package` entries are equal only when they share one archive source.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Directory(left), Self::Directory(right))
            | (Self::Archive(left), Self::Archive(right)) => left == right,
            (Self::Package(left), Self::Package(right)) => Arc::ptr_eq(left, right),
            _ => false,
        }
    }
}

impl Eq for ClassPathEntry {}

/// Compiled class located on a classpath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassResource {
    pub class_name: String,
    /// Classpath entry the bytes came from.
    pub origin: PathBuf,
    pub bytes: Vec<u8>,
}

/// File entry names of one archive; `None` marks a skipped library.
type EntryIndex = Option<Arc<HashSet<String>>>;

/// Classpath; earlier entries win.
#[derive(Debug, Default)]
pub struct ClassPath {
    entries: Vec<ClassPathEntry>,
    /// Keyed by position in `entries`.
    indexes: Mutex<HashMap<usize, EntryIndex>>,
}

impl ClassPath {
    pub fn new(entries: Vec<ClassPathEntry>) -> Self {
        Self {
            entries,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    /// Classpath of a flat package: the package alone.
    pub fn for_flat(package: Arc<dyn PackageArchive>) -> Self {
        Self::new(vec![ClassPathEntry::Package(package)])
    }

    /// Classpath of an unpacked package: its root, then each file in `lib/`.
    ///
    /// Library files keep directory listing order. A missing `lib/` leaves
    /// only the root.
    pub fn for_extracted(root: &Path) -> LoaderResult<Self> {
        let mut entries = vec![ClassPathEntry::Directory(root.to_path_buf())];

        let lib_dir = root.join("lib");
        if lib_dir.is_dir() {
            let listing = fs::read_dir(&lib_dir).map_err(|err| LoaderError::io(&lib_dir, err))?;
            for item in listing {
                let item = item.map_err(|err| LoaderError::io(&lib_dir, err))?;
                let file_type = item
                    .file_type()
                    .map_err(|err| LoaderError::io(item.path(), err))?;
                if file_type.is_file() {
                    entries.push(ClassPathEntry::Archive(item.path()));
                }
            }
        }
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[ClassPathEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the compiled form of `class_name`.
    pub fn find_class(&self, class_name: &str) -> LoaderResult<Option<ClassResource>> {
        let resource = class_resource_name(class_name);
        Ok(self
            .find_resource(&resource)?
            .map(|(origin, bytes)| ClassResource {
                class_name: class_name.to_string(),
                origin,
                bytes,
            }))
    }

    /// Returns `(origin, bytes)` of the first entry holding `resource`.
    ///
    /// # Errors
    /// - `LoaderError::Io` when an unpacked file or the package archive
    ///   itself cannot be read. Unreadable library files are skipped.
    pub fn find_resource(&self, resource: &str) -> LoaderResult<Option<(PathBuf, Vec<u8>)>> {
        let relative = safe_relative_path(resource)?;
        for (position, entry) in self.entries.iter().enumerate() {
            let found = match entry {
                ClassPathEntry::Directory(root) => read_from_directory(&root.join(&relative))?,
                ClassPathEntry::Archive(path) => {
                    self.read_indexed(position, &TarPackage::new(path), resource, true)?
                }
                ClassPathEntry::Package(package) => {
                    self.read_indexed(position, package.as_ref(), resource, false)?
                }
            };
            if let Some(bytes) = found {
                return Ok(Some((entry.path().to_path_buf(), bytes)));
            }
        }
        Ok(None)
    }

    fn read_indexed(
        &self,
        position: usize,
        archive: &dyn PackageArchive,
        resource: &str,
        skip_unreadable: bool,
    ) -> LoaderResult<Option<Vec<u8>>> {
        let Some(index) = self.entry_index(position, archive, skip_unreadable)? else {
            return Ok(None);
        };
        if !index.contains(resource) {
            return Ok(None);
        }
        match read_entry(archive, resource) {
            Err(err) if skip_unreadable => {
                log_skipped(archive.location(), &err);
                Ok(None)
            }
            result => result,
        }
    }

    fn entry_index(
        &self,
        position: usize,
        archive: &dyn PackageArchive,
        skip_unreadable: bool,
    ) -> LoaderResult<EntryIndex> {
        if let Some(index) = self.indexes.lock().get(&position) {
            return Ok(index.clone());
        }

        let index = match index_entries(archive) {
            Ok(names) => {
                debug!(
                    "event=classpath_index module=package status=ok entry={} files={}",
                    archive.location().display(),
                    names.len()
                );
                Some(Arc::new(names))
            }
            Err(err) if skip_unreadable => {
                log_skipped(archive.location(), &err);
                None
            }
            Err(err) => return Err(err),
        };
        Ok(self.indexes.lock().entry(position).or_insert(index).clone())
    }
}

/// Maps `app.Main` to `app/Main.class`.
pub fn class_resource_name(class_name: &str) -> String {
    format!("{}{CLASS_FILE_SUFFIX}", class_name.replace('.', "/"))
}

fn read_from_directory(path: &Path) -> LoaderResult<Option<Vec<u8>>> {
    if !path.is_file() {
        return Ok(None);
    }
    fs::read(path)
        .map(Some)
        .map_err(|err| LoaderError::io(path, err))
}

fn index_entries(archive: &dyn PackageArchive) -> LoaderResult<HashSet<String>> {
    let mut names = HashSet::new();
    archive.visit_entries(&mut |entry| {
        if !entry.is_dir() {
            names.insert(entry.path().to_string());
        }
        Ok(Visit::Continue)
    })?;
    Ok(names)
}

fn read_entry(archive: &dyn PackageArchive, resource: &str) -> LoaderResult<Option<Vec<u8>>> {
    let mut found = None;
    archive.visit_entries(&mut |mut entry| {
        if entry.is_dir() || entry.path() != resource {
            return Ok(Visit::Continue);
        }
        let mut bytes = Vec::new();
        entry
            .reader()
            .read_to_end(&mut bytes)
            .map_err(|err| LoaderError::io(archive.location(), err))?;
        found = Some(bytes);
        Ok(Visit::Stop)
    })?;
    Ok(found)
}

fn log_skipped(entry: &Path, err: &LoaderError) {
    warn!(
        "event=classpath_skip module=package status=warn entry={} error_code={} error={}",
        entry.display(),
        err.code(),
        err
    );
}

#[cfg(test)]
mod tests {
    use super::{class_resource_name, ClassPath, ClassPathEntry};
    use crate::package::archive::{write_package, ArchiveEntry, EntryKind, PackageArchive, Visit};
    use crate::package::{LoaderError, LoaderResult};
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Package held in memory; counts how often it is scanned.
    struct MemoryPackage {
        location: PathBuf,
        files: Vec<(&'static str, &'static [u8])>,
        readable: bool,
        visits: AtomicUsize,
    }

    impl MemoryPackage {
        fn new(files: Vec<(&'static str, &'static [u8])>) -> Self {
            Self {
                location: PathBuf::from("/nonexistent/memory.jar"),
                files,
                readable: true,
                visits: AtomicUsize::new(0),
            }
        }

        fn unreadable() -> Self {
            Self {
                readable: false,
                ..Self::new(Vec::new())
            }
        }
    }

    impl PackageArchive for MemoryPackage {
        fn location(&self) -> &Path {
            &self.location
        }

        fn visit_entries(
            &self,
            visitor: &mut dyn FnMut(ArchiveEntry<'_>) -> LoaderResult<Visit>,
        ) -> LoaderResult<()> {
            self.visits.fetch_add(1, Ordering::SeqCst);
            if !self.readable {
                return Err(LoaderError::Io {
                    path: self.location.clone(),
                    source: io::Error::new(io::ErrorKind::Other, "store offline"),
                });
            }
            for (path, bytes) in &self.files {
                let mut reader: &[u8] = bytes;
                if visitor(ArchiveEntry::new(*path, EntryKind::File, &mut reader))? == Visit::Stop {
                    break;
                }
            }
            Ok(())
        }
    }

    #[test]
    fn maps_class_names_to_resources() {
        assert_eq!(class_resource_name("app.Main"), "app/Main.class");
        assert_eq!(class_resource_name("Main"), "Main.class");
        assert_eq!(class_resource_name("app.Outer$Inner"), "app/Outer$Inner.class");
    }

    #[test]
    fn extracted_classpath_lists_root_then_lib_files() {
        let scratch = tempfile::tempdir().expect("scratch dir");
        let root = scratch.path();
        fs::create_dir_all(root.join("lib/nested")).expect("create lib");
        fs::write(root.join("lib/a.jar"), b"a").expect("write a");
        fs::write(root.join("lib/b.jar"), b"b").expect("write b");
        fs::write(root.join("lib/nested/c.jar"), b"c").expect("write c");

        let class_path = ClassPath::for_extracted(root).expect("build classpath");
        assert_eq!(class_path.len(), 3);
        assert_eq!(
            class_path.entries()[0],
            ClassPathEntry::Directory(root.to_path_buf())
        );
        let mut libs: Vec<_> = class_path.entries()[1..]
            .iter()
            .map(|entry| entry.path().to_path_buf())
            .collect();
        libs.sort();
        assert_eq!(libs, vec![root.join("lib/a.jar"), root.join("lib/b.jar")]);
    }

    #[test]
    fn first_entry_holding_the_class_wins() {
        let scratch = tempfile::tempdir().expect("scratch dir");
        let root = scratch.path().join("root");
        fs::create_dir_all(root.join("app")).expect("create app dir");
        fs::write(root.join("app/Main.class"), b"from-root").expect("write root class");
        let jar = write_package(
            scratch.path().join("dep.jar"),
            &[
                ("app/Main.class", b"from-jar".as_slice()),
                ("dep/Util.class", b"util".as_slice()),
            ],
        )
        .expect("write dep");

        let class_path = ClassPath::new(vec![
            ClassPathEntry::Directory(root.clone()),
            ClassPathEntry::Archive(jar.location().to_path_buf()),
        ]);

        let main = class_path
            .find_class("app.Main")
            .expect("lookup main")
            .expect("main present");
        assert_eq!(main.bytes, b"from-root");
        assert_eq!(main.origin, root);

        let util = class_path
            .find_class("dep.Util")
            .expect("lookup util")
            .expect("util present");
        assert_eq!(util.bytes, b"util");
        assert_eq!(util.origin, scratch.path().join("dep.jar"));

        assert!(class_path
            .find_class("app.Missing")
            .expect("lookup missing")
            .is_none());
    }

    #[test]
    fn unreadable_library_is_skipped() {
        let scratch = tempfile::tempdir().expect("scratch dir");
        let junk = scratch.path().join("native.so");
        fs::write(&junk, vec![0xffu8; 1024]).expect("write junk");

        let class_path = ClassPath::new(vec![ClassPathEntry::Archive(junk)]);
        assert!(class_path
            .find_class("app.Main")
            .expect("junk library should be skipped")
            .is_none());
    }

    #[test]
    fn flat_classpath_reads_through_the_package_source() {
        let package = Arc::new(MemoryPackage::new(vec![
            ("app/Main.class", b"main".as_slice()),
            ("app/Other.class", b"other".as_slice()),
        ]));
        let class_path = ClassPath::for_flat(Arc::clone(&package) as Arc<dyn PackageArchive>);
        assert_eq!(class_path.entries()[0].path(), Path::new("/nonexistent/memory.jar"));

        for _ in 0..3 {
            assert!(class_path
                .find_class("app.Missing")
                .expect("lookup missing")
                .is_none());
        }
        assert_eq!(package.visits.load(Ordering::SeqCst), 1, "names are indexed once");

        let main = class_path
            .find_class("app.Main")
            .expect("lookup main")
            .expect("main present");
        assert_eq!(main.bytes, b"main");
        assert_eq!(main.origin, PathBuf::from("/nonexistent/memory.jar"));
        assert_eq!(package.visits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unreadable_package_source_is_an_error() {
        let class_path = ClassPath::for_flat(Arc::new(MemoryPackage::unreadable()));
        let err = class_path
            .find_class("app.Main")
            .expect_err("package read failure must surface");
        assert_eq!(err.code(), "io");
    }

    #[test]
    fn skipped_library_is_not_rescanned() {
        let scratch = tempfile::tempdir().expect("scratch dir");
        let junk = scratch.path().join("native.so");
        fs::write(&junk, vec![0xffu8; 1024]).expect("write junk");
        let class_path = ClassPath::new(vec![ClassPathEntry::Archive(junk.clone())]);

        assert!(class_path.find_class("app.Main").expect("first lookup").is_none());
        fs::remove_file(&junk).expect("remove junk");
        assert!(class_path
            .find_class("app.Other")
            .expect("skipped library stays skipped")
            .is_none());
    }
}
