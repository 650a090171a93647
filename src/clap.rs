// =============================================================================
// Matrixon Matrix NextServer - Command Line Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

use std::path::PathBuf;

use clap::Parser;

/// Returns the current version of the crate with extra info if supplied
///
/// Set the environment variable `MATRIXON_VERSION_EXTRA` to any UTF-8 string to
/// include it in parenthesis after the SemVer version. A common value are git
/// commit hashes.
fn version() -> String {
    let cargo_pkg_version = env!("CARGO_PKG_VERSION");

    match option_env!("MATRIXON_VERSION_EXTRA") {
        Some(x) => format!("{} ({})", cargo_pkg_version, x),
        None => cargo_pkg_version.to_owned(),
    }
}

/// Command line arguments
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(about, version = version(), name = "matrixon-stream")]
pub struct Args {
    /// Path to configuration file
    #[clap(short, long, env = "MATRIXON_CONFIG")]
    pub config: PathBuf,

    /// Log filter override, e.g. `debug` or `matrixon_stream=trace`
    #[clap(short, long)]
    pub log_level: Option<String>,
}

/// Parse commandline arguments into structured data
#[must_use]
pub fn parse() -> Args {
    Args::parse()
}
