//! In-process zip plumbing: pull one entry out, put one entry back, and
//! pack or unpack whole directory trees.

use crate::core::config::ZIP_ALIGNMENT;
use crate::core::error::{Error, Result};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ZipFileOptions {
    Aligned(u16),
    Compressed,
}

impl ZipFileOptions {
    pub fn alignment(self) -> u16 {
        match self {
            Self::Aligned(align) => align,
            Self::Compressed => 1,
        }
    }

    pub fn compression_method(self) -> CompressionMethod {
        match self {
            Self::Compressed => CompressionMethod::Deflated,
            Self::Aligned(_) => CompressionMethod::Stored,
        }
    }

    fn for_method(method: CompressionMethod) -> Self {
        match method {
            CompressionMethod::Stored => Self::Aligned(ZIP_ALIGNMENT),
            _ => Self::Compressed,
        }
    }
}

pub fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    ZipArchive::new(file).map_err(|e| Error::archive(path, e))
}

/// Reads the named entry fully into memory.
pub fn extract_entry(archive_path: &Path, name: &str) -> Result<Vec<u8>> {
    let mut archive = open_archive(archive_path)?;
    let mut f = archive.by_name(name).map_err(|e| match e {
        ZipError::FileNotFound => Error::EntryNotFound {
            archive: archive_path.to_path_buf(),
            name: name.to_string(),
        },
        e => Error::archive(archive_path, e),
    })?;
    let mut buf = Vec::with_capacity(f.size() as usize);
    f.read_to_end(&mut buf)
        .map_err(|e| Error::io(archive_path, e))?;
    Ok(buf)
}

/// Copies `source` to `dest` with the named entry's contents swapped for
/// `contents`. Every other entry is copied raw, in order. The entry keeps its
/// position, timestamp, permissions and compression method; a missing entry is
/// appended, deflated.
pub fn rewrite_entry(source: &Path, dest: &Path, name: &str, contents: &[u8]) -> Result<()> {
    let mut archive = open_archive(source)?;
    let out = File::create(dest).map_err(|e| Error::io(dest, e))?;
    let mut zip = ZipWriter::new(out);
    write_with_entry(&mut archive, &mut zip, name, contents)
        .map_err(|e| e.located(source, dest))?;
    zip.finish().map_err(|e| Error::archive(dest, e))?;
    Ok(())
}

/// Inserts or overwrites the named entry of an existing archive. The new
/// archive is assembled next to the old one and only moved over it once it is
/// complete, so a failure leaves the original intact.
pub fn replace_entry(archive_path: &Path, name: &str, contents: &[u8]) -> Result<()> {
    let dir = match archive_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
    {
        let mut archive = open_archive(archive_path)?;
        let mut zip = ZipWriter::new(tmp.as_file_mut());
        write_with_entry(&mut archive, &mut zip, name, contents)
            .map_err(|e| e.located(archive_path, archive_path))?;
        zip.finish().map_err(|e| Error::archive(archive_path, e))?;
    }
    tmp.persist(archive_path)
        .map_err(|e| Error::io(archive_path, e.error))?;
    Ok(())
}

/// Failures of a streaming rewrite, before we know which path to blame.
enum RewriteError {
    Read(ZipError),
    Write(ZipError),
    Io(io::Error),
}

impl RewriteError {
    fn located(self, source: &Path, dest: &Path) -> Error {
        match self {
            Self::Read(e) => Error::archive(source, e),
            Self::Write(e) => Error::archive(dest, e),
            Self::Io(e) => Error::io(dest, e),
        }
    }
}

fn write_with_entry<W: Write + io::Seek>(
    archive: &mut ZipArchive<File>,
    zip: &mut ZipWriter<W>,
    name: &str,
    contents: &[u8],
) -> std::result::Result<(), RewriteError> {
    let mut replaced = false;
    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i).map_err(RewriteError::Read)?;
        if entry.name() != name {
            zip.raw_copy_file(entry).map_err(RewriteError::Write)?;
            continue;
        }
        let mut options = FileOptions::default()
            .compression_method(ZipFileOptions::for_method(entry.compression()).compression_method())
            .last_modified_time(entry.last_modified());
        if let Some(mode) = entry.unix_mode() {
            options = options.unix_permissions(mode);
        }
        drop(entry);
        zip.start_file(name, options).map_err(RewriteError::Write)?;
        zip.write_all(contents).map_err(RewriteError::Io)?;
        replaced = true;
    }
    if !replaced {
        log::debug!("`{name}` not present, appending it");
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file(name, options).map_err(RewriteError::Write)?;
        zip.write_all(contents).map_err(RewriteError::Io)?;
    }
    Ok(())
}

/// Names of the file entries stored without compression.
pub fn stored_entries(archive_path: &Path) -> Result<BTreeSet<String>> {
    let mut archive = open_archive(archive_path)?;
    let mut stored = BTreeSet::new();
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| Error::archive(archive_path, e))?;
        if !entry.is_dir() && entry.compression() == CompressionMethod::Stored {
            stored.insert(entry.name().to_string());
        }
    }
    Ok(stored)
}

/// Extracts every entry below `dest`. Entry names that would escape `dest`
/// are rejected by the zip reader.
pub fn unpack_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).map_err(|e| Error::io(dest, e))?;
    let mut archive = open_archive(archive_path)?;
    archive
        .extract(dest)
        .map_err(|e| Error::archive(archive_path, e))?;
    Ok(())
}

/// Packs the directory tree at `source` into a fresh archive at `dest`.
/// Files named in `stored` are written uncompressed and aligned, everything
/// else is deflated. Entries are written in sorted order so repeated builds
/// of the same tree are identical.
pub fn build_archive(source: &Path, dest: &Path, stored: &BTreeSet<String>) -> Result<()> {
    let mut zip = Zip::new(dest)?;
    add_recursive(&mut zip, source, "", stored)?;
    zip.finish()
}

struct Zip {
    zip: ZipWriter<File>,
    path: PathBuf,
}

impl Zip {
    fn new(path: &Path) -> Result<Self> {
        Ok(Self {
            zip: ZipWriter::new(File::create(path).map_err(|e| Error::io(path, e))?),
            path: path.to_path_buf(),
        })
    }

    fn add_file(&mut self, source: &Path, dest: &str, opts: ZipFileOptions) -> Result<()> {
        let mut f = File::open(source).map_err(|e| Error::io(source, e))?;
        let zopts = FileOptions::default().compression_method(opts.compression_method());
        self.zip
            .start_file_aligned(dest, zopts, opts.alignment())
            .map_err(|e| Error::archive(&self.path, e))?;
        io::copy(&mut f, &mut self.zip).map_err(|e| Error::io(source, e))?;
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        self.zip
            .finish()
            .map_err(|e| Error::archive(&self.path, e))?;
        Ok(())
    }
}

fn add_recursive(
    zip: &mut Zip,
    source: &Path,
    prefix: &str,
    stored: &BTreeSet<String>,
) -> Result<()> {
    let mut entries = fs::read_dir(source)
        .map_err(|e| Error::io(source, e))?
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| Error::io(source, e))?;
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let path = entry.path();
        let file_name = entry.file_name();
        let file_name = file_name.to_str().ok_or_else(|| {
            Error::io(
                &path,
                io::Error::new(io::ErrorKind::InvalidData, "file name is not valid UTF-8"),
            )
        })?;
        let name = if prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{prefix}/{file_name}")
        };
        let file_type = entry.file_type().map_err(|e| Error::io(&path, e))?;
        if file_type.is_dir() {
            add_recursive(zip, &path, &name, stored)?;
        } else if file_type.is_file() {
            let opts = if stored.contains(&name) {
                ZipFileOptions::Aligned(ZIP_ALIGNMENT)
            } else {
                ZipFileOptions::Compressed
            };
            zip.add_file(&path, &name, opts)?;
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Writes a small archive. Entries flagged `true` are stored, the rest deflated.
    pub(crate) fn write_zip(path: &Path, entries: &[(&str, &[u8], bool)]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, contents, stored) in entries {
            let method = if *stored {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflated
            };
            zip.start_file(*name, FileOptions::default().compression_method(method))
                .unwrap();
            zip.write_all(contents).unwrap();
        }
        zip.finish().unwrap();
    }

    pub(crate) fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = open_archive(path).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index_raw(i).unwrap().name().to_string())
            .collect()
    }

    fn sorted_names(path: &Path) -> Vec<String> {
        let mut names = entry_names(path);
        names.sort();
        names
    }

    #[test]
    fn extract_entry_returns_contents() {
        let dir = tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        write_zip(
            &apk,
            &[("AndroidManifest.xml", b"manifest", false), ("a.txt", b"a", true)],
        );
        assert_eq!(extract_entry(&apk, "AndroidManifest.xml").unwrap(), b"manifest");
        assert_eq!(extract_entry(&apk, "a.txt").unwrap(), b"a");
    }

    #[test]
    fn extract_missing_entry_is_reported() {
        let dir = tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        write_zip(&apk, &[("a.txt", b"a", false)]);
        let err = extract_entry(&apk, "AndroidManifest.xml").unwrap_err();
        assert!(
            matches!(&err, Error::EntryNotFound { name, .. } if name == "AndroidManifest.xml"),
            "{err}"
        );
    }

    #[test]
    fn extract_from_missing_archive_is_io_error() {
        let dir = tempdir().unwrap();
        let err = extract_entry(&dir.path().join("nope.apk"), "a").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn extract_from_garbage_is_archive_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("junk.apk");
        fs::write(&path, b"definitely not a zip file").unwrap();
        let err = extract_entry(&path, "a").unwrap_err();
        assert!(matches!(err, Error::Archive { .. }), "{err}");
    }

    #[test]
    fn replace_entry_keeps_order_and_neighbours() {
        let dir = tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        write_zip(
            &apk,
            &[
                ("AndroidManifest.xml", b"old", false),
                ("resources.arsc", b"table", true),
                ("classes.dex", b"dex", false),
            ],
        );
        replace_entry(&apk, "AndroidManifest.xml", b"new manifest").unwrap();
        assert_eq!(
            entry_names(&apk),
            ["AndroidManifest.xml", "resources.arsc", "classes.dex"]
        );
        assert_eq!(
            extract_entry(&apk, "AndroidManifest.xml").unwrap(),
            b"new manifest"
        );
        assert_eq!(extract_entry(&apk, "resources.arsc").unwrap(), b"table");
        assert_eq!(extract_entry(&apk, "classes.dex").unwrap(), b"dex");
        assert_eq!(
            stored_entries(&apk).unwrap().into_iter().collect::<Vec<_>>(),
            ["resources.arsc"]
        );
    }

    #[test]
    fn replace_entry_appends_when_absent() {
        let dir = tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        write_zip(&apk, &[("classes.dex", b"dex", false)]);
        replace_entry(&apk, "AndroidManifest.xml", b"manifest").unwrap();
        assert_eq!(entry_names(&apk), ["classes.dex", "AndroidManifest.xml"]);
        assert_eq!(extract_entry(&apk, "AndroidManifest.xml").unwrap(), b"manifest");
    }

    #[test]
    fn replaced_entry_round_trips_binary_contents() {
        let dir = tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        write_zip(&apk, &[("AndroidManifest.xml", b"old", true)]);
        let contents = (0..=255u8).cycle().take(4096).collect::<Vec<_>>();
        replace_entry(&apk, "AndroidManifest.xml", &contents).unwrap();
        assert_eq!(extract_entry(&apk, "AndroidManifest.xml").unwrap(), contents);
        assert!(stored_entries(&apk).unwrap().contains("AndroidManifest.xml"));
    }

    #[test]
    fn rewrite_entry_leaves_source_alone() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.apk");
        let dst = dir.path().join("dst.apk");
        write_zip(&src, &[("AndroidManifest.xml", b"old", false)]);
        let before = fs::read(&src).unwrap();
        rewrite_entry(&src, &dst, "AndroidManifest.xml", b"new").unwrap();
        assert_eq!(fs::read(&src).unwrap(), before);
        assert_eq!(extract_entry(&dst, "AndroidManifest.xml").unwrap(), b"new");
    }

    #[test]
    fn unpack_then_build_preserves_tree_and_storage() {
        let dir = tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        write_zip(
            &apk,
            &[
                ("AndroidManifest.xml", b"manifest", false),
                ("res/layout/main.xml", b"layout", false),
                ("lib/arm64-v8a/libfoo.so", b"\x7fELF", true),
                ("resources.arsc", b"table", true),
            ],
        );
        let unpacked = dir.path().join("unpacked");
        unpack_archive(&apk, &unpacked).unwrap();
        assert_eq!(
            fs::read(unpacked.join("res/layout/main.xml")).unwrap(),
            b"layout"
        );

        let stored = stored_entries(&apk).unwrap();
        let rebuilt = dir.path().join("rebuilt.apk");
        build_archive(&unpacked, &rebuilt, &stored).unwrap();
        assert_eq!(sorted_names(&rebuilt), sorted_names(&apk));
        assert_eq!(stored_entries(&rebuilt).unwrap(), stored);
        for name in entry_names(&apk) {
            assert_eq!(
                extract_entry(&rebuilt, &name).unwrap(),
                extract_entry(&apk, &name).unwrap(),
                "{name}"
            );
        }
    }

    #[test]
    fn build_archive_is_deterministic() {
        let dir = tempdir().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("b")).unwrap();
        fs::write(tree.join("b/z.txt"), b"z").unwrap();
        fs::write(tree.join("a.txt"), b"a").unwrap();
        let first = dir.path().join("first.zip");
        let second = dir.path().join("second.zip");
        build_archive(&tree, &first, &BTreeSet::new()).unwrap();
        build_archive(&tree, &second, &BTreeSet::new()).unwrap();
        assert_eq!(entry_names(&first), ["a.txt", "b/z.txt"]);
        assert_eq!(entry_names(&first), entry_names(&second));
    }
}
