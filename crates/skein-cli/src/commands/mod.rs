pub mod check;
pub mod render;

use skein_runtime::RuntimeConfig;
use std::path::Path;

/// `--config` file, or the defaults when none is given
pub(crate) fn load_config(path: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(path) => Ok(RuntimeConfig::load(path)?),
        None => Ok(RuntimeConfig::default()),
    }
}
