//! CLI subcommand: `copyguard paths`
//!
//! Prints all resolved XDG-compliant paths for debugging and scripting.

use anyhow::Result;

use crate::paths::Paths;

pub fn run() -> Result<()> {
    let paths = Paths::resolve()?;

    println!("copyguard Paths (XDG Base Directory)");
    println!("====================================");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    println!("  config.toml:    {}", paths.config_file().display());
    println!();
    println!("Data:       {}", paths.data_dir.display());
    println!("  default root:   {}", paths.default_root().display());
    println!();
    println!("State:      {}", paths.state_dir.display());
    println!();
    match paths.runtime_dir {
        Some(ref dir) => println!("Runtime:    {}", dir.display()),
        None => println!("Runtime:    (not available)"),
    }
    println!("  PID file:       {}", paths.pid_file().display());

    Ok(())
}
