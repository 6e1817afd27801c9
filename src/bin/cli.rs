use anyhow::Result;
use clap::Parser;
use memsheet::cli;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // Logs go to stderr; stdout carries only the JSON payload.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli_args = cli::Cli::parse();
    cli::errors::ensure_output_supported(cli_args.format)?;
    let payload = cli::run_command(cli_args.engine, cli_args.command).await?;
    cli::output::emit_value(&payload, cli_args.format, cli_args.compact, cli_args.quiet)?;
    Ok(())
}
