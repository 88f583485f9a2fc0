//! alertprice CLI: estimate alerting policy costs for projects, folders or organizations.

use anyhow::Result;
use clap::Parser;
use alertprice::engine::arg_parser::Cli;
use alertprice::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
