use anyhow::Result;
use parser::{Cli, Commands};

#[macro_use]
extern crate log;

mod simulate;

const CITATION: &str = "\
If you use phylosim-rs in published work, please cite the repository:
  PHYLOSIM-rs: Phylogenetic sequence alignment simulation.
  https://github.com/phylosim/phylosim-rs";

/// Dispatch a parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    match cli.commands {
        Commands::Simulate { sim, indel, output } => {
            simulate::run(&sim, &indel, &output)?;
        },

        Commands::FromYaml { yaml } => {
            info!("Replaying arguments from '{}'", yaml.display());
            let cli = Cli::from_yaml(&yaml)?;
            self::run(cli)?;
        },

        Commands::Cite => println!("{CITATION}"),
    };
    Ok(())
}
