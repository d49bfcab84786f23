//! Command-line argument parsing

use std::path::PathBuf;

use clap::Parser;
use replup_connection::ResetMode;

/// Upload a project directory to a MicroPython board over its raw REPL
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Serial port the board is attached to (e.g. /dev/ttyUSB0, COM3)
    pub port: String,

    /// Local directory (or single file) to upload
    #[arg(short, long, default_value = ".")]
    pub directory: PathBuf,

    /// File or directory name to skip; repeatable, added to the configured list
    #[arg(short, long = "exclude", value_name = "NAME")]
    pub excludes: Vec<String>,

    /// Upload only files with this name; repeatable
    #[arg(short, long = "include", value_name = "NAME")]
    pub includes: Vec<String>,

    /// Send Python sources unmodified
    #[arg(long)]
    pub no_smash: bool,

    /// 0 off, 1 blank lines, 2 full-line comments, 3 inline comments
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub smash_level: Option<u8>,

    /// Show what would be uploaded without opening the port
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Debug logging and device output echo
    #[arg(short, long)]
    pub verbose: bool,

    /// Payload bytes per write statement
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub chunk_size: Option<u32>,

    /// Serial speed
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Stop at the first file that fails
    #[arg(long)]
    pub fail_fast: bool,

    /// Reset the board after opening the port: none, soft or machine
    #[arg(long)]
    pub reset: Option<ResetMode>,

    /// Configuration file (default: ./replup.toml if present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the session report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}
