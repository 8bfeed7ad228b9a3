//! certpilot - certificate lifecycle engine
//!
//! Runs the renewal scheduler and exposes the manual operations an operator
//! needs from a shell: renewing a certificate, deploying to a target and
//! checking DNS provider credentials.

mod commands;

use clap::{Parser, Subcommand};
use commands::{
    DeployCommand, GenerateKeyCommand, RenewCommand, RunOnceCommand, ServeCommand, TestDnsCommand,
};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CERTPILOT_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "CERTPILOT_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the renewal scheduler until Ctrl-C
    Serve(ServeCommand),
    /// Run a single scheduler cycle and wait for its workers
    RunOnce(RunOnceCommand),
    /// Renew one certificate now
    Renew(RenewCommand),
    /// Deploy a certificate through one deploy config
    Deploy(DeployCommand),
    /// Test the credentials of a DNS provider
    TestDns(TestDnsCommand),
    /// Print a new encryption key
    GenerateKey(GenerateKeyCommand),
}

fn log_filter(level: &str) -> anyhow::Result<tracing_subscriber::EnvFilter> {
    // RUST_LOG wins when set
    if std::env::var("RUST_LOG").is_ok() {
        return Ok(tracing_subscriber::EnvFilter::try_from_default_env()?);
    }
    Ok(tracing_subscriber::EnvFilter::new(format!(
        "certpilot={level},\
         certpilot_cli={level},\
         certpilot_core={level},\
         certpilot_certificates={level},\
         certpilot_dns={level},\
         certpilot_deployer={level},\
         certpilot_database={level},\
         certpilot_migrations={level},\
         instant_acme=warn,\
         sqlx=warn,\
         sea_orm=warn,\
         sea_orm_migration=warn,\
         h2=warn,\
         hyper=warn,\
         reqwest=warn,\
         rustls=warn",
        level = level
    )))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };
    let subscriber = tracing_subscriber::registry()
        .with(log_filter(&cli.log_level)?)
        .with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve(cmd) => cmd.execute(),
        Commands::RunOnce(cmd) => cmd.execute(),
        Commands::Renew(cmd) => cmd.execute(),
        Commands::Deploy(cmd) => cmd.execute(),
        Commands::TestDns(cmd) => cmd.execute(),
        Commands::GenerateKey(cmd) => cmd.execute(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_subcommands() {
        let cli = Cli::try_parse_from(["certpilot", "renew", "7", "--config", "c.yaml"]).unwrap();
        assert!(matches!(cli.command, Commands::Renew(ref cmd) if cmd.certificate_id == 7));
        assert_eq!(cli.log_level, "info");

        let cli = Cli::try_parse_from(["certpilot", "--log-format", "full", "generate-key"]).unwrap();
        assert_eq!(cli.log_format, "full");
        assert!(matches!(cli.command, Commands::GenerateKey(_)));

        assert!(Cli::try_parse_from(["certpilot", "deploy"]).is_err());
    }

    #[test]
    fn test_log_filter_accepts_levels() {
        if std::env::var("RUST_LOG").is_err() {
            assert!(log_filter("debug").is_ok());
        }
    }
}
