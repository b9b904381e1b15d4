use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "mediaswap")]
#[command(about = "Media ingestion, caching and selection pipeline", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute the configured queries and report what was loaded
    Run(RunArgs),
    /// Execute the configured queries and expose the status router
    Serve(ServeArgs),
    /// Remove stale cache files and exit
    Prune,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Stop draining after this many seconds
    #[arg(long)]
    pub seconds: Option<u64>,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the status router to (overrides server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,
}
