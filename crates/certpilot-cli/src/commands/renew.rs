use super::context::{ConfigArgs, EngineContext};
use certpilot_certificates::{CertificateService, TaskService, TaskStatus};
use clap::Args;
use colored::Colorize;

#[derive(Args)]
pub struct RenewCommand {
    /// Certificate id
    pub certificate_id: i32,

    /// Print the final task as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub config: ConfigArgs,
}

impl RenewCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.renew())
    }

    async fn renew(self) -> anyhow::Result<()> {
        let ctx = EngineContext::build(&self.config.config).await?;
        let certificates = CertificateService::new(ctx.engine.clone());
        let tasks = TaskService::new(ctx.engine.tasks().clone());

        let dispatched = certificates.renew_certificate(self.certificate_id).await?;
        println!(
            "Renewing certificate {} ({}), task {}",
            self.certificate_id,
            dispatched.task.task_type,
            dispatched.task.id
        );
        let task_id = dispatched.task.id;
        dispatched.handle.await?;

        let task = tasks.get_task(task_id).await?;
        ctx.engine.shutdown().await;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        match task.status {
            TaskStatus::Success => {
                let message = task.result.map(|r| r.message).unwrap_or_default();
                println!("{} {}", "✓".bright_green(), message);
                Ok(())
            }
            status => anyhow::bail!(
                "task {} ended as {}: {}",
                task.id,
                status,
                task.error_message.unwrap_or_default()
            ),
        }
    }
}
