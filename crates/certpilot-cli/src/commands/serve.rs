use super::context::{ConfigArgs, EngineContext};
use certpilot_certificates::RenewalScheduler;
use clap::Args;
use colored::Colorize;
use std::sync::Arc;
use tracing::info;

#[derive(Args)]
pub struct ServeCommand {
    #[command(flatten)]
    pub config: ConfigArgs,
}

impl ServeCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.serve())
    }

    async fn serve(self) -> anyhow::Result<()> {
        let ctx = EngineContext::build(&self.config.config).await?;
        let scheduler = Arc::new(RenewalScheduler::new(
            ctx.engine.clone(),
            ctx.config.scheduler.interval(),
        ));
        scheduler.start().await?;

        println!(
            "{} renewal scheduler running every {}s, press Ctrl-C to stop",
            "certpilot".bright_green().bold(),
            ctx.config.scheduler.interval().as_secs()
        );

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");

        scheduler.stop().await;
        // interrupted tasks are failed by the recovery sweep on next start
        ctx.engine.shutdown().await;
        println!("{}", "Stopped".bright_white());
        Ok(())
    }
}
