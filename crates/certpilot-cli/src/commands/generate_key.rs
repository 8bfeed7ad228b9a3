use certpilot_core::EncryptionService;
use clap::Args;
use colored::Colorize;

/// Prints a fresh key for `encryption_key` / CERTPILOT_ENCRYPTION_KEY
#[derive(Args)]
pub struct GenerateKeyCommand {
    /// Print only the key
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

impl GenerateKeyCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let key = EncryptionService::generate_key();
        if self.quiet {
            println!("{}", key);
        } else {
            println!("{}", "Generated encryption key:".bright_white().bold());
            println!("  {}", key.bright_cyan());
            println!();
            println!("Store it as encryption_key in the config file or in CERTPILOT_ENCRYPTION_KEY.");
            println!("Secrets written with one key cannot be read with another.");
        }
        Ok(())
    }
}
