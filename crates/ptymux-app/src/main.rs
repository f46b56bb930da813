use anyhow::Result;
use clap::{CommandFactory, Parser};

use ptymux_app::{commands, logging, AppConfig, Cli, Commands, LayoutCommands};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Some(shell) = cli.generate {
        let mut command = Cli::command();
        let name = command.get_name().to_string();
        clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
        return Ok(());
    }

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    if let Commands::Layout {
        command: LayoutCommands::Check { layout, cols, rows },
    } = &command
    {
        return commands::check_layout(layout, *cols, *rows);
    }

    let mut config = AppConfig::resolve(cli.config.as_deref())?;
    command.apply_overrides(&mut config);

    match command {
        Commands::Serve { .. } => {
            logging::init(cli.verbose);
            commands::serve(&config).await
        }
        Commands::Mux {
            layout, log_file, ..
        } => {
            logging::init_for_mux(log_file.as_deref(), cli.verbose)?;
            commands::mux(&config, layout.as_deref()).await
        }
        Commands::Layout { .. } => Ok(()),
    }
}
