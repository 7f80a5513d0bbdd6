use std::process;

use clap::Parser;
use logger::Logger;

#[macro_use]
extern crate log;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// Parse command line arguments and run `phylosim_rs::run()`.
fn main() {
    // ----------------------------- Run CLI parser.
    let cli = parser::Cli::parse();

    // ----------------------------- Init logger.
    Logger::init(cli.verbose + u8::from(!cli.quiet));

    // ----------------------------- Serialize command line arguments.
    if let Err(e) = cli.serialize() {
        warn!("Failed to serialize command line arguments: {e}");
    }

    // ----------------------------- Run.
    if let Err(e) = phylosim_rs::run(cli) {
        error!("{e:?}");
        process::exit(1);
    }
}
