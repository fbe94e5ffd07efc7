//! Pads the binary manifest of an APK, then re-aligns and re-signs it.

use anyhow::{Context, Result};
use apkglitch::core::align::{Aligner, ZipAligner, ZipalignTool};
use apkglitch::core::config::{
    GlitchConfig, APKSIGNER, DEFAULT_NULL_BYTES, DEFAULT_OUTPUT, VERSION, ZIPALIGN,
};
use apkglitch::core::sign::{ApkSigner, SigningKey};
use apkglitch::core::tools;
use apkglitch::{Error, GlitchOptions, Pipeline, ReinsertMode};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Glitch AndroidManifest.xml and sign the APK
#[derive(Parser, Debug)]
#[command(name = "glitch_apk")]
#[command(version)]
struct Cli {
    /// Input APK file
    #[arg(long)]
    apk: PathBuf,

    /// Null bytes to inject (multiple of 4)
    #[arg(long, default_value_t = DEFAULT_NULL_BYTES, allow_negative_numbers = true)]
    null_bytes: i64,

    /// Keystore path
    #[arg(long)]
    keystore: PathBuf,

    /// Key alias
    #[arg(long)]
    alias: String,

    /// Keystore password
    #[arg(long)]
    storepass: String,

    /// Key password
    #[arg(long)]
    keypass: String,

    /// Output signed APK
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Minimum SDK version handed to apksigner
    #[arg(long)]
    min_sdk_version: Option<u32>,

    /// Path to zipalign
    #[arg(long)]
    zipalign: Option<PathBuf>,

    /// Path to apksigner
    #[arg(long)]
    apksigner: Option<PathBuf>,

    /// Align in-process instead of running zipalign
    #[arg(long)]
    builtin_align: bool,

    /// Rebuild the whole archive instead of replacing the manifest entry
    #[arg(long)]
    repack: bool,

    /// Refuse paddings above this many bytes
    #[arg(long)]
    max_null_bytes: Option<u32>,

    /// Keep the work directory with every intermediate artifact
    #[arg(long)]
    keep_workdir: bool,

    /// TOML file with tool paths and defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// More output, repeat for even more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    log::debug!("glitch_apk {VERSION}");

    std::process::exit(report(run(cli)));
}

/// Prints the outcome and picks the exit status: 2 for unusable arguments,
/// 1 for any other failure.
fn report(result: Result<PathBuf>) -> i32 {
    match result {
        Ok(output) => {
            let shown = dunce::canonicalize(&output).unwrap_or(output);
            println!("Final APK created: {}", shown.display());
            0
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            exit_code(&e)
        }
    }
}

fn exit_code(e: &anyhow::Error) -> i32 {
    let usage = e
        .downcast_ref::<Error>()
        .map(Error::is_validation)
        .unwrap_or(false);
    if usage {
        2
    } else {
        1
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("apkglitch={level},glitch_apk={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<PathBuf> {
    let config = match &cli.config {
        Some(path) => GlitchConfig::load(path)?,
        None => GlitchConfig::default(),
    };

    let aligner: Box<dyn Aligner> = if cli.builtin_align {
        Box::new(ZipAligner::default())
    } else {
        let zipalign = cli.zipalign.as_deref().or(config.tools.zipalign.as_deref());
        Box::new(ZipalignTool::new(tools::locate(ZIPALIGN, zipalign, "ZIPALIGN")))
    };
    let apksigner = cli
        .apksigner
        .as_deref()
        .or(config.tools.apksigner.as_deref());
    let signer = ApkSigner::new(tools::locate(APKSIGNER, apksigner, "APKSIGNER"));

    let options = GlitchOptions {
        input: cli.apk,
        output: cli.output,
        null_bytes: cli.null_bytes,
        max_null_bytes: cli.max_null_bytes.or(config.patch.max_null_bytes),
        key: SigningKey {
            keystore: cli.keystore,
            alias: cli.alias,
            store_pass: cli.storepass,
            key_pass: cli.keypass,
        },
        min_sdk_version: cli
            .min_sdk_version
            .unwrap_or(config.signing.min_sdk_version),
        mode: if cli.repack {
            ReinsertMode::Repack
        } else {
            ReinsertMode::Update
        },
        keep_workdir: cli.keep_workdir,
    };

    let pipeline = Pipeline::new(options, aligner, Box::new(signer));
    let output = pipeline
        .run()
        .with_context(|| format!("Glitching `{}`", pipeline.options().input.display()))?;
    Ok(output)
}
