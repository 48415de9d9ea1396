#![recursion_limit = "256"]

mod application;
mod cli;
mod data;
mod domain;
mod error;
mod infra;
mod ml;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("transformer_recipes=info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    Cli::parse().run()
}
