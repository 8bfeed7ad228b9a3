use super::context::{ConfigArgs, EngineContext};
use clap::Args;
use colored::Colorize;

#[derive(Args)]
pub struct TestDnsCommand {
    /// DNS provider id
    pub provider_id: i32,

    #[command(flatten)]
    pub config: ConfigArgs,
}

impl TestDnsCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.test())
    }

    async fn test(self) -> anyhow::Result<()> {
        let ctx = EngineContext::build(&self.config.config).await?;
        let provider = ctx.dns.get(self.provider_id).await?;

        match ctx.dns.test_provider(self.provider_id).await {
            Ok(()) => {
                println!(
                    "{} {} provider '{}' credentials are valid",
                    "✓".bright_green(),
                    provider.provider_type,
                    provider.name
                );
                Ok(())
            }
            Err(e) => {
                println!(
                    "{} {} provider '{}' failed: {}",
                    "✗".bright_red(),
                    provider.provider_type,
                    provider.name,
                    e
                );
                Err(e.into())
            }
        }
    }
}
