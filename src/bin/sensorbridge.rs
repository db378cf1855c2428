use clap::Parser;
use sensorbridge::cli::{commands, Cli, Commands};
use sensorbridge::native;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            native::init_tracing(cli.log_format);
            commands::execute_serve(args).await?
        }
        Commands::Config(args) => commands::execute_config(args)?,
        Commands::Tail(args) => commands::execute_tail(args).await?,
        Commands::Publish(args) => commands::execute_publish(args).await?,
    }

    Ok(())
}
