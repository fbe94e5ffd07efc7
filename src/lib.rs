//! Pad the compiled `AndroidManifest.xml` of an APK so rigid binary XML
//! parsers lose their footing, then re-align and re-sign the package so the
//! platform still installs it.

pub mod core;

pub use crate::core::error::{Error, Result};
pub use crate::core::pipeline::{GlitchOptions, Pipeline, ReinsertMode};
