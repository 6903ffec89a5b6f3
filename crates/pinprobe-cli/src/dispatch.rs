use std::io;

use anyhow::Result;

use crate::completion::write_completions_script;
use crate::flows::{run_discover_command, run_update_command};
use crate::render::{current_output_style, TerminalRenderer};
use crate::{Cli, Commands};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => {
            let renderer = TerminalRenderer::from_style(current_output_style());
            let renderer = if args.json {
                renderer.on_stderr()
            } else {
                renderer
            };
            run_update_command(&args, renderer)?;
        }
        Commands::Discover { project } => {
            let renderer = TerminalRenderer::from_style(current_output_style());
            run_discover_command(&project, renderer)?;
        }
        Commands::Completions { shell } => {
            let mut stdout = io::stdout().lock();
            write_completions_script(shell, &mut stdout)?;
        }
    }

    Ok(())
}
