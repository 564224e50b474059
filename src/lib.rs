//! fieldview
//!
//! Type deduction and lowering for a field-view stencil language.
//!
//! Field operators are pure functions over fields (arrays indexed by named
//! dimensions); programs call operators and write the results into output
//! fields over an iteration domain. The crate checks both levels and lowers
//! them into an iterator IR (`deref`, `shift`, `lift`, `reduce`) packaged as
//! a [`middle::ProgramUnit`].
//!
//! # Example
//!
//! ```no_run
//! use fieldview::util::config::CompileConfig;
//! use fieldview::{compile_file, Result};
//! use std::path::Path;
//!
//! fn main() -> Result<()> {
//!     let result = compile_file(Path::new("batch.json"), &CompileConfig::default())?;
//!     for report in &result.programs {
//!         if let Some(unit) = &report.output {
//!             println!("{}", unit);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/fieldview")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod frontend;
pub mod middle;

// Utility modules
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use anyhow::{Context, Result};
pub use frontend::pipeline::{Batch, BatchResult, CancellationToken, UnitState};
pub use util::diagnostic::{Diagnostic, ErrorKind, Stage};

use crate::util::config::CompileConfig;
use std::path::Path;
use tracing::debug;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Load a JSON batch and compile it
///
/// Unit failures are reported inside the returned [`BatchResult`]; only I/O,
/// parse and registry failures surface as errors here.
pub fn compile_file(
    path: &Path,
    config: &CompileConfig,
) -> Result<BatchResult> {
    debug!("Compiling batch file {}", path.display());
    let batch = frontend::pipeline::load_batch(path)?;
    let result = batch
        .compile(config)
        .with_context(|| format!("Failed to build registry for {}", path.display()))?;
    Ok(result)
}
