pub mod check;
pub mod config;
pub mod paths;
pub mod service;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "copyguard")]
#[command(
    author,
    version,
    about = "One-way file protection: nothing leaves the protected folder via the clipboard, nothing foreign lands in it"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Protect the configured root in the foreground until stopped
    Start,

    /// Stop a running instance
    Stop,

    /// Show whether protection is running and how it is configured
    Status,

    /// Report whether a path is inside the protected root
    Check(check::CheckArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved XDG directory paths
    Paths,
}
