use crate::core::archive::open_archive;
use crate::core::config::{SHARED_LIB_ALIGNMENT, ZIP_ALIGNMENT};
use crate::core::error::{Error, Result};
use crate::core::tools;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Rewrites an archive so stored entries start on aligned offsets.
/// `output` is overwritten when it already exists.
pub trait Aligner {
    fn align(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Runs the SDK's `zipalign -f -p 4`.
#[derive(Clone, Debug)]
pub struct ZipalignTool {
    program: PathBuf,
}

impl ZipalignTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-f")
            .arg("-p")
            .arg(ZIP_ALIGNMENT.to_string())
            .arg(input)
            .arg(output);
        command
    }
}

impl Aligner for ZipalignTool {
    fn align(&self, input: &Path, output: &Path) -> Result<()> {
        tools::run(self.command(input, output))
    }
}

/// Aligns without leaving the process. Stored entries are re-emitted with
/// padding in their extra field, compressed entries are copied raw.
#[derive(Clone, Copy, Debug)]
pub struct ZipAligner {
    alignment: u16,
    page_align_libs: bool,
}

impl Default for ZipAligner {
    fn default() -> Self {
        Self {
            alignment: ZIP_ALIGNMENT,
            page_align_libs: true,
        }
    }
}

impl ZipAligner {
    pub fn new(alignment: u16, page_align_libs: bool) -> Self {
        Self {
            alignment,
            page_align_libs,
        }
    }

    fn alignment_for(&self, name: &str) -> u16 {
        entry_alignment(name, self.alignment, self.page_align_libs)
    }
}

fn entry_alignment(name: &str, alignment: u16, page_align_libs: bool) -> u16 {
    if page_align_libs && name.ends_with(".so") {
        SHARED_LIB_ALIGNMENT
    } else {
        alignment
    }
}

impl Aligner for ZipAligner {
    fn align(&self, input: &Path, output: &Path) -> Result<()> {
        let mut archive = open_archive(input)?;
        let out = File::create(output).map_err(|e| Error::io(output, e))?;
        let mut zip = ZipWriter::new(out);
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index_raw(i)
                .map_err(|e| Error::archive(input, e))?;
            if entry.is_dir() || entry.compression() != CompressionMethod::Stored {
                zip.raw_copy_file(entry)
                    .map_err(|e| Error::archive(output, e))?;
                continue;
            }
            let name = entry.name().to_string();
            let mut options = FileOptions::default()
                .compression_method(CompressionMethod::Stored)
                .last_modified_time(entry.last_modified())
                .large_file(entry.size() > u64::from(u32::MAX));
            if let Some(mode) = entry.unix_mode() {
                options = options.unix_permissions(mode);
            }
            zip.start_file_aligned(name, options, self.alignment_for(entry.name()))
                .map_err(|e| Error::archive(output, e))?;
            io::copy(&mut entry, &mut zip).map_err(|e| Error::io(input, e))?;
        }
        zip.finish().map_err(|e| Error::archive(output, e))?;
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Misaligned {
    pub name: String,
    pub data_start: u64,
    pub alignment: u16,
}

/// Lists stored entries whose data does not start on the required boundary.
/// Shared libraries are held to the page boundary when `page_align_libs` is set.
pub fn check_alignment(
    archive_path: &Path,
    alignment: u16,
    page_align_libs: bool,
) -> Result<Vec<Misaligned>> {
    let mut archive = open_archive(archive_path)?;
    let mut misaligned = vec![];
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| Error::archive(archive_path, e))?;
        if entry.is_dir() || entry.compression() != CompressionMethod::Stored {
            continue;
        }
        let required = entry_alignment(entry.name(), alignment, page_align_libs);
        if entry.data_start() % u64::from(required) != 0 {
            misaligned.push(Misaligned {
                name: entry.name().to_string(),
                data_start: entry.data_start(),
                alignment: required,
            });
        }
    }
    Ok(misaligned)
}
