use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    demo_ingest_cli::init_tracing();
    let cli = demo_ingest_cli::Cli::parse();
    demo_ingest_cli::run_cli(cli)
}
