//! Command-line parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "chunkup", about = "Resumable chunked uploads to a tus server")]
pub struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, short, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Upload one or more files
    Upload {
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },
    /// List objects stored on the server
    List,
}
