use super::context::{ConfigArgs, EngineContext};
use certpilot_certificates::{RenewalScheduler, TaskStatus};
use clap::Args;
use colored::Colorize;

#[derive(Args)]
pub struct RunOnceCommand {
    #[command(flatten)]
    pub config: ConfigArgs,
}

impl RunOnceCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let ctx = EngineContext::build(&self.config.config).await?;
        ctx.engine.recover_interrupted().await?;

        let scheduler = RenewalScheduler::new(ctx.engine.clone(), ctx.config.scheduler.interval());
        let report = scheduler.run_once().await?;
        println!(
            "Reclassified {}, synced {}, skipped {}, dispatched {}",
            report.reclassified,
            report.synced,
            report.skipped,
            report.dispatched.len()
        );

        let task_ids: Vec<i32> = report.dispatched.iter().map(|d| d.task.id).collect();
        report.join().await;

        let mut failed = 0;
        for id in task_ids {
            let Some(task) = ctx.engine.tasks().get(id).await? else {
                continue;
            };
            match task.status {
                TaskStatus::Success => println!(
                    "  {} certificate {}",
                    "renewed".bright_green(),
                    task.certificate_id
                ),
                _ => {
                    failed += 1;
                    println!(
                        "  {} certificate {}: {}",
                        "failed".bright_red(),
                        task.certificate_id,
                        task.error_message.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
        ctx.engine.shutdown().await;

        if failed > 0 {
            anyhow::bail!("{} renewal(s) failed", failed);
        }
        Ok(())
    }
}
