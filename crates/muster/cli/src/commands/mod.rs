//! Command implementations

pub mod graph;
pub mod providers;
pub mod provision;

use std::path::Path;

use muster_provisioner::DescriptionFormat;

use crate::error::{CliError, CliResult};

/// Read a system description file as text together with its format
pub(crate) fn read_description(path: &Path) -> CliResult<(String, DescriptionFormat)> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok((text, DescriptionFormat::from_path(path)))
}
