use anyhow::Result;

use thaiid_reader::cli::commands::run_cli;

fn main() -> Result<()> {
    run_cli()
}
