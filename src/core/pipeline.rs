//! Copy → extract → patch → re-insert → align → sign, once, in order.
//!
//! Every intermediate artifact lives in a scratch directory owned by the run,
//! so concurrent runs never share paths and nothing is left behind.

use crate::core::align::{check_alignment, Aligner};
use crate::core::archive;
use crate::core::axml::{self, Padding};
use crate::core::config::{MANIFEST_ENTRY, ZIP_ALIGNMENT};
use crate::core::error::{Error, Result};
use crate::core::sign::{Signer, SigningKey};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A transition of the pipeline. Errors are tagged with the one that failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Copy,
    Extract,
    Patch,
    Reinsert,
    Align,
    Sign,
    Publish,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Extract => "extract",
            Self::Patch => "patch",
            Self::Reinsert => "reinsert",
            Self::Align => "align",
            Self::Sign => "sign",
            Self::Publish => "publish",
        }
    }

    /// The state reached once this stage succeeds.
    pub fn reaches(self) -> State {
        match self {
            Self::Copy => State::Copied,
            Self::Extract => State::Extracted,
            Self::Patch => State::Patched,
            Self::Reinsert => State::Reinserted,
            Self::Align => State::Aligned,
            Self::Sign => State::Signed,
            Self::Publish => State::Done,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Start,
    Copied,
    Extracted,
    Patched,
    Reinserted,
    Aligned,
    Signed,
    Done,
}

/// How the patched manifest goes back into the package.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReinsertMode {
    /// Swap the single entry, copying every other entry untouched.
    #[default]
    Update,
    /// Unpack everything and build a fresh archive from the directory.
    Repack,
}

#[derive(Clone, Debug)]
pub struct GlitchOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Requested padding, validated before anything runs.
    pub null_bytes: i64,
    pub max_null_bytes: Option<u32>,
    pub key: SigningKey,
    pub min_sdk_version: u32,
    pub mode: ReinsertMode,
    pub keep_workdir: bool,
}

pub struct Pipeline {
    options: GlitchOptions,
    aligner: Box<dyn Aligner>,
    signer: Box<dyn Signer>,
}

/// Intermediate artifact paths of one run.
struct Workspace {
    working: PathBuf,
    reinserted: PathBuf,
    unpacked: PathBuf,
    aligned: PathBuf,
    signed: PathBuf,
}

impl Workspace {
    fn new(dir: &Path) -> Self {
        Self {
            working: dir.join("working.apk"),
            reinserted: dir.join("reinserted.apk"),
            unpacked: dir.join("unpacked"),
            aligned: dir.join("aligned.apk"),
            signed: dir.join("signed.apk"),
        }
    }
}

impl Pipeline {
    pub fn new(options: GlitchOptions, aligner: Box<dyn Aligner>, signer: Box<dyn Signer>) -> Self {
        Self {
            options,
            aligner,
            signer,
        }
    }

    pub fn options(&self) -> &GlitchOptions {
        &self.options
    }

    /// Runs every stage and returns the path of the signed package.
    /// An invalid padding is reported before any file is touched.
    pub fn run(&self) -> Result<PathBuf> {
        let padding = Padding::with_limit(self.options.null_bytes, self.options.max_null_bytes)?;

        let workdir = tempfile::Builder::new()
            .prefix("apkglitch-")
            .tempdir()
            .map_err(|e| Error::io(std::env::temp_dir(), e).at(Stage::Copy))?;
        log::debug!("Work directory {}", workdir.path().display());

        let result = self.run_in(&Workspace::new(workdir.path()), padding);
        if self.options.keep_workdir {
            let kept = workdir.keep();
            log::info!("Kept work directory {}", kept.display());
        }
        result
    }

    fn run_in(&self, ws: &Workspace, padding: Padding) -> Result<PathBuf> {
        let opts = &self.options;
        let mut state = State::Start;

        step(&mut state, Stage::Copy, || {
            fs::copy(&opts.input, &ws.working).map_err(|e| Error::io(&opts.input, e))?;
            log::info!(
                "Copied {} -> {}",
                opts.input.display(),
                ws.working.display()
            );
            Ok(())
        })?;

        let manifest = step(&mut state, Stage::Extract, || {
            archive::extract_entry(&ws.working, MANIFEST_ENTRY)
        })?;

        let patched = step(&mut state, Stage::Patch, || {
            let patched = axml::insert_padding(&manifest, padding)?;
            log::info!("Patched {MANIFEST_ENTRY} with {padding} null bytes");
            Ok(patched)
        })?;

        step(&mut state, Stage::Reinsert, || match opts.mode {
            ReinsertMode::Update => {
                archive::rewrite_entry(&ws.working, &ws.reinserted, MANIFEST_ENTRY, &patched)
            }
            ReinsertMode::Repack => {
                let stored = archive::stored_entries(&ws.working)?;
                archive::unpack_archive(&ws.working, &ws.unpacked)?;
                let manifest_path = ws.unpacked.join(MANIFEST_ENTRY);
                fs::write(&manifest_path, &patched).map_err(|e| Error::io(&manifest_path, e))?;
                archive::build_archive(&ws.unpacked, &ws.reinserted, &stored)
            }
        })?;

        step(&mut state, Stage::Align, || {
            self.aligner.align(&ws.reinserted, &ws.aligned)?;
            for entry in check_alignment(&ws.aligned, ZIP_ALIGNMENT, true)? {
                log::warn!(
                    "`{}` still starts at {} (not a multiple of {})",
                    entry.name,
                    entry.data_start,
                    entry.alignment
                );
            }
            Ok(())
        })?;

        step(&mut state, Stage::Sign, || {
            self.signer
                .sign(&ws.aligned, &ws.signed, &opts.key, opts.min_sdk_version)
        })?;

        step(&mut state, Stage::Publish, || {
            fs::copy(&ws.signed, &opts.output).map_err(|e| Error::io(&opts.output, e))?;
            Ok(())
        })?;

        debug_assert_eq!(state, State::Done);
        Ok(opts.output.clone())
    }
}

/// Runs one stage. On success the state advances, on failure it stays put and
/// the error is tagged with the stage.
fn step<T>(state: &mut State, stage: Stage, f: impl FnOnce() -> Result<T>) -> Result<T> {
    log::debug!("{state:?}: running {stage}");
    match f() {
        Ok(value) => {
            *state = stage.reaches();
            log::info!("{stage} done, now {state:?}");
            Ok(value)
        }
        Err(e) => {
            log::debug!("{stage} failed in state {state:?}: {e:?}");
            Err(e.at(stage))
        }
    }
}
