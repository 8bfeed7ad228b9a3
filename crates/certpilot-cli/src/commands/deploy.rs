use super::context::{ConfigArgs, EngineContext};
use certpilot_certificates::DeployService;
use clap::Args;
use colored::Colorize;

#[derive(Args)]
pub struct DeployCommand {
    /// Deploy config id
    pub deploy_config_id: i32,

    /// Only check the target is reachable
    #[arg(long)]
    pub test: bool,

    #[command(flatten)]
    pub config: ConfigArgs,
}

impl DeployCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.deploy())
    }

    async fn deploy(self) -> anyhow::Result<()> {
        let ctx = EngineContext::build(&self.config.config).await?;
        let service = DeployService::new(ctx.engine.clone());
        let config = service.get_deploy_config(self.deploy_config_id).await?;

        if self.test {
            service.test_deploy_config(config.id).await?;
            println!(
                "{} {} target '{}' is reachable",
                "✓".bright_green(),
                config.deploy_type,
                config.name
            );
            return Ok(());
        }

        let task = service.execute_deploy(config.id).await?;
        println!(
            "{} deployed certificate {} to '{}' (task {})",
            "✓".bright_green(),
            config.certificate_id,
            config.name,
            task.id
        );
        Ok(())
    }
}
