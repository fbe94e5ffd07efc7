use crate::core::error::Result;
use crate::core::tools;
use std::path::{Path, PathBuf};
use std::process::Command;

const STORE_PASS_ENV: &str = "APKGLITCH_KS_PASS";
const KEY_PASS_ENV: &str = "APKGLITCH_KEY_PASS";

/// Keystore credentials for the final signature.
#[derive(Clone)]
pub struct SigningKey {
    pub keystore: PathBuf,
    pub alias: String,
    pub store_pass: String,
    pub key_pass: String,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("keystore", &self.keystore)
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

pub trait Signer {
    fn sign(
        &self,
        input: &Path,
        output: &Path,
        key: &SigningKey,
        min_sdk_version: u32,
    ) -> Result<()>;
}

/// Signs through the SDK's `apksigner`. Passwords travel in the child's
/// environment so they never show up in a process listing.
#[derive(Clone, Debug)]
pub struct ApkSigner {
    program: PathBuf,
}

impl ApkSigner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(
        &self,
        input: &Path,
        output: &Path,
        key: &SigningKey,
        min_sdk_version: u32,
    ) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("sign")
            .arg("--ks")
            .arg(&key.keystore)
            .arg("--ks-key-alias")
            .arg(&key.alias)
            .arg("--ks-pass")
            .arg(format!("env:{STORE_PASS_ENV}"))
            .arg("--key-pass")
            .arg(format!("env:{KEY_PASS_ENV}"))
            .arg("--min-sdk-version")
            .arg(min_sdk_version.to_string())
            .arg("--out")
            .arg(output)
            .arg(input)
            .env(STORE_PASS_ENV, &key.store_pass)
            .env(KEY_PASS_ENV, &key.key_pass);
        command
    }
}

impl Signer for ApkSigner {
    fn sign(
        &self,
        input: &Path,
        output: &Path,
        key: &SigningKey,
        min_sdk_version: u32,
    ) -> Result<()> {
        log::debug!(
            "Signing {} with alias `{}` from {}",
            input.display(),
            key.alias,
            key.keystore.display()
        );
        tools::run(self.command(input, output, key, min_sdk_version))
    }
}
