//! Package layout detection.

use super::archive::{PackageArchive, Visit};
use super::LoaderResult;
use log::debug;

/// Top-level directory holding bundled dependency archives.
pub const DEPENDENCY_DIR_PREFIX: &str = "lib/";

/// How a package arranges its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageLayout {
    /// Compiled classes at the root, no bundled dependencies.
    Flat,
    /// Dependencies bundled under `lib/`; must be unpacked before use.
    Legacy,
}

/// Path plus directory flag of one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDescriptor {
    pub path: String,
    pub is_dir: bool,
}

impl EntryDescriptor {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_dir: false,
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
        }
    }
}

/// Only top-level `lib/` marks a bundled dependency; nested `classes/` trees
/// are not a recognized convention.
pub fn is_dependency_entry(path: &str) -> bool {
    path.starts_with(DEPENDENCY_DIR_PREFIX)
}

/// Classifies a layout from a lazy entry sequence, stopping at the first match.
pub fn classify_layout<I>(entries: I) -> PackageLayout
where
    I: IntoIterator<Item = EntryDescriptor>,
{
    if entries
        .into_iter()
        .any(|entry| is_dependency_entry(&entry.path))
    {
        PackageLayout::Legacy
    } else {
        PackageLayout::Flat
    }
}

/// Scans `archive` until the first dependency entry, or to its end.
pub fn detect_layout<A>(archive: &A) -> LoaderResult<PackageLayout>
where
    A: PackageArchive + ?Sized,
{
    let mut layout = PackageLayout::Flat;
    let mut scanned = 0usize;
    archive.visit_entries(&mut |entry| {
        scanned += 1;
        if is_dependency_entry(entry.path()) {
            layout = PackageLayout::Legacy;
            return Ok(Visit::Stop);
        }
        Ok(Visit::Continue)
    })?;

    debug!(
        "event=layout_detect module=package status=ok layout={:?} entries_scanned={} archive={}",
        layout,
        scanned,
        archive.location().display()
    );
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::{classify_layout, detect_layout, EntryDescriptor, PackageLayout};
    use crate::package::archive::{write_package, PackageWriter};

    #[test]
    fn flat_when_no_lib_entries() {
        let layout = classify_layout(vec![
            EntryDescriptor::dir("app/"),
            EntryDescriptor::file("app/Main.class"),
            EntryDescriptor::file("META-INF/MANIFEST.MF"),
        ]);
        assert_eq!(layout, PackageLayout::Flat);
    }

    #[test]
    fn legacy_on_lib_directory_or_file() {
        assert_eq!(
            classify_layout(vec![EntryDescriptor::dir("lib/")]),
            PackageLayout::Legacy
        );
        assert_eq!(
            classify_layout(vec![
                EntryDescriptor::file("app/Main.class"),
                EntryDescriptor::file("lib/a.jar"),
            ]),
            PackageLayout::Legacy
        );
    }

    #[test]
    fn nested_lib_and_classes_dirs_do_not_count() {
        let layout = classify_layout(vec![
            EntryDescriptor::file("app/lib/a.jar"),
            EntryDescriptor::file("classes/app/Main.class"),
            EntryDescriptor::file("library/readme.txt"),
        ]);
        assert_eq!(layout, PackageLayout::Flat);
    }

    #[test]
    fn classification_stops_at_first_match() {
        let mut pulled = 0;
        let entries = ["lib/a.jar", "app/Main.class", "app/Other.class"]
            .into_iter()
            .inspect(|_| pulled += 1)
            .map(EntryDescriptor::file);

        assert_eq!(classify_layout(entries), PackageLayout::Legacy);
        assert_eq!(pulled, 1);
    }

    #[test]
    fn detects_layout_of_real_archives() {
        let dir = tempfile::tempdir().expect("scratch dir");
        let flat = write_package(
            dir.path().join("flat.tar.gz"),
            &[("app/Main.class", b"main".as_slice())],
        )
        .expect("write flat");
        assert_eq!(
            detect_layout(&flat).expect("detect flat"),
            PackageLayout::Flat
        );

        let mut writer = PackageWriter::create(dir.path().join("legacy.tar.gz")).expect("create");
        writer.add_dir("lib/").expect("add lib dir");
        writer.add_file("lib/a.jar", b"jar").expect("add jar");
        writer
            .add_file("app/Main.class", b"main")
            .expect("add class");
        let legacy = writer.finish().expect("finish");
        assert_eq!(
            detect_layout(&legacy).expect("detect legacy"),
            PackageLayout::Legacy
        );
    }
}
