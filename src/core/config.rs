use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Archive entry holding the compiled manifest.
pub const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

pub const DEFAULT_NULL_BYTES: i64 = 4;

pub const DEFAULT_OUTPUT: &str = "signed.apk";

/// Boundary stored entries must start on for the platform loader to mmap them.
pub const ZIP_ALIGNMENT: u16 = 4;

/// Boundary for uncompressed native libraries, same as `zipalign -p`.
pub const SHARED_LIB_ALIGNMENT: u16 = 4096;

pub const DEFAULT_MIN_SDK_VERSION: u32 = 21;

pub const ZIPALIGN: &str = "zipalign";
pub const APKSIGNER: &str = "apksigner";

/// Every section carries `#[serde(default)]`, so a file that only sets
/// `[signing]` still gets default `[tools]` and `[patch]` groups.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct GlitchConfig {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub patch: PatchConfig,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct ToolsConfig {
    pub zipalign: Option<PathBuf>,
    pub apksigner: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SigningConfig {
    #[serde(default = "default_min_sdk_version")]
    pub min_sdk_version: u32,
}

fn default_min_sdk_version() -> u32 {
    DEFAULT_MIN_SDK_VERSION
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            min_sdk_version: default_min_sdk_version(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct PatchConfig {
    /// Upper bound on the padding length. Unbounded when absent.
    pub max_null_bytes: Option<u32>,
}

impl GlitchConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}
