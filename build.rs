//! Renders the `sortie(1)` man page into `OUT_DIR` from the clap definitions
//! shared with the binary.

use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

fn render_man_page(out_dir: &Path) -> io::Result<PathBuf> {
    let command = cli::Cli::command();
    let target = out_dir.join(format!("{}.1", command.get_name()));
    let mut page = Vec::new();
    Man::new(command).render(&mut page)?;
    fs::write(&target, page)?;
    Ok(target)
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;
    render_man_page(&out_dir)?;
    Ok(())
}
