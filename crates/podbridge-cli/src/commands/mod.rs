//! Subcommands.

pub mod config;
pub mod infer;
pub mod inspect;
mod tensors;

use podbridge_core::{Bridge, BridgeError};

/// Attach the host error name (`LoadError`, `NameError`, ...) to a bridge failure.
pub(crate) fn bridge_error(err: BridgeError) -> anyhow::Error {
    anyhow::anyhow!("{}: {}", err.kind(), err)
}

/// Build a bridge from the resolved configuration.
pub(crate) fn open_bridge(config_path: Option<&str>) -> anyhow::Result<Bridge> {
    let config = config::load(config_path)?;
    Bridge::new(config).map_err(bridge_error)
}
