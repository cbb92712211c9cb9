//! Socket-types command implementation for Ramen CLI.

use std::path::Path;

use ramen_core::{NodeDump, SocketTypeSummary};

use crate::colors;

/// Summarise the socket types of a node dump, to stdout or to `output`.
pub fn execute(dump_path: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let dump = NodeDump::load(dump_path)?;
    let summary = SocketTypeSummary::from_dump(&dump);
    let report = summary.render();

    match output {
        Some(path) => {
            std::fs::write(path, &report).map_err(|source| ramen_core::Error::File {
                path: path.to_path_buf(),
                source,
            })?;
            println!(
                "{}✓{} {} input / {} output socket types from {} nodes written to {}",
                colors::GREEN,
                colors::RESET,
                summary.input_types.len(),
                summary.output_types.len(),
                dump.node_count(),
                path.display()
            );
        }
        None => print!("{report}"),
    }

    Ok(())
}
