//! Build script for generating the `clash` man pages.
//!
//! Packaging picks the pages up from the build output directory: one page for
//! `clash` itself and one per subcommand (`clash-run.1`, `clash-attach.1`).

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let command = Cli::command();
    write_page(&out_dir.join("clash.1"), &Man::new(command.clone()))?;
    for subcommand in command.get_subcommands() {
        let name = format!("clash-{}", subcommand.get_name());
        let page = Man::new(subcommand.clone()).title(name.clone());
        write_page(&out_dir.join(format!("{name}.1")), &page)?;
    }

    Ok(())
}

fn write_page(path: &Path, page: &Man) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    page.render(&mut buffer)?;
    File::create(path)?.write_all(&buffer)?;
    Ok(())
}
