//! CLI subcommand: `copyguard check <path>`
//!
//! Reports whether a path falls under the configured protected root.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use crate::config::Config;
use crate::guard::{ProtectedRoot, normalize};

#[derive(Args)]
pub struct CheckArgs {
    /// Path to evaluate (need not exist)
    pub path: PathBuf,

    /// Exit with status 1 when the path is protected
    #[arg(long)]
    pub exit_code: bool,
}

pub fn run(args: CheckArgs) -> Result<()> {
    let config = Config::load()?;
    let root = ProtectedRoot::resolve(config.root_path());

    let protected = root.contains(&args.path);
    println!(
        "{} is {} by {}",
        normalize(&args.path).display(),
        if protected { "protected" } else { "not protected" },
        root.path().display()
    );

    if protected && args.exit_code {
        std::process::exit(1);
    }
    Ok(())
}
