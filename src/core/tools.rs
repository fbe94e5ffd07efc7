//! Locating and running the Android build tools.

use crate::core::error::{Error, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Resolves a build tool. First hit wins: an explicit path, the tool's own
/// environment variable, the newest `build-tools` of `$ANDROID_HOME` or
/// `$ANDROID_SDK_ROOT`, and finally the bare name for a `PATH` lookup.
pub fn locate(name: &str, explicit: Option<&Path>, env_var: &str) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = std::env::var_os(env_var).filter(|v| !v.is_empty()) {
        return PathBuf::from(path);
    }
    for sdk_var in ["ANDROID_HOME", "ANDROID_SDK_ROOT"] {
        if let Some(sdk) = std::env::var_os(sdk_var).filter(|v| !v.is_empty()) {
            if let Some(path) = newest_build_tool(Path::new(&sdk), name) {
                log::debug!("Found {name} via {sdk_var}: {}", path.display());
                return path;
            }
        }
    }
    PathBuf::from(name)
}

/// Looks for `name` under `<sdk>/build-tools/<version>/`, newest version first.
pub fn newest_build_tool(sdk: &Path, name: &str) -> Option<PathBuf> {
    let build_tools = sdk.join("build-tools");
    let mut versions = fs::read_dir(&build_tools)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name())
        .collect::<Vec<_>>();
    versions.sort_by_key(|version| version_key(version));
    versions.into_iter().rev().find_map(|version| {
        executable_names(name)
            .into_iter()
            .map(|file| build_tools.join(&version).join(file))
            .find(|candidate| candidate.is_file())
    })
}

/// `34.0.0` sorts above `30.0.3` and above `34.0.0-rc1`.
fn version_key(version: &OsString) -> (Vec<u32>, bool) {
    let version = version.to_string_lossy();
    let (release, pre) = match version.split_once('-') {
        Some((release, _)) => (release, true),
        None => (&*version, false),
    };
    let parts = release
        .split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect();
    (parts, !pre)
}

fn executable_names(name: &str) -> Vec<String> {
    if cfg!(windows) {
        vec![format!("{name}.exe"), format!("{name}.bat")]
    } else {
        vec![name.to_string()]
    }
}

/// Runs a tool to completion. Non-zero exit turns into [`Error::Tool`]
/// carrying whatever the tool printed on stderr.
pub fn run(mut command: Command) -> Result<()> {
    let tool = PathBuf::from(command.get_program());
    let args = command
        .get_args()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    log::debug!("Running {} {}", tool.display(), args.join(" "));

    let output = command.output().map_err(|source| Error::ToolSpawn {
        tool: tool.clone(),
        source,
    })?;
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        log::debug!("{}: {line}", tool.display());
    }
    if !output.status.success() {
        return Err(Error::Tool {
            tool,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        log::warn!("{}: {line}", tool.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch_tool(sdk: &Path, version: &str, name: &str) -> PathBuf {
        let dir = sdk.join("build-tools").join(version);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(&executable_names(name)[0]);
        fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn picks_newest_build_tools() {
        let sdk = tempdir().unwrap();
        touch_tool(sdk.path(), "30.0.3", "zipalign");
        let newest = touch_tool(sdk.path(), "34.0.0", "zipalign");
        touch_tool(sdk.path(), "34.0.0-rc1", "zipalign");
        touch_tool(sdk.path(), "9.0.0", "zipalign");
        assert_eq!(newest_build_tool(sdk.path(), "zipalign"), Some(newest));
    }

    #[test]
    fn skips_versions_without_the_tool() {
        let sdk = tempdir().unwrap();
        let older = touch_tool(sdk.path(), "33.0.2", "apksigner");
        touch_tool(sdk.path(), "35.0.0", "zipalign");
        assert_eq!(newest_build_tool(sdk.path(), "apksigner"), Some(older));
    }

    #[test]
    fn missing_sdk_yields_nothing() {
        let sdk = tempdir().unwrap();
        assert_eq!(newest_build_tool(sdk.path(), "zipalign"), None);
    }

    #[test]
    fn explicit_path_wins() {
        let path = Path::new("/opt/tools/zipalign");
        assert_eq!(locate("zipalign", Some(path), "APKGLITCH_TEST_UNSET"), path);
    }

    #[cfg(unix)]
    #[test]
    fn run_reports_exit_status_and_stderr() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo broken keystore >&2; exit 3");
        let err = run(command).unwrap_err();
        match err {
            Error::Tool { status, stderr, .. } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr.trim(), "broken keystore");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn run_succeeds_on_zero_exit() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo fine");
        run(command).unwrap();
    }

    #[test]
    fn missing_tool_is_a_spawn_error() {
        let err = run(Command::new("apkglitch-no-such-tool")).unwrap_err();
        assert!(matches!(err, Error::ToolSpawn { .. }), "{err}");
    }
}
