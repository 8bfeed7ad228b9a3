pub mod certificates;
pub mod deploy_configs;
pub mod dns_providers;
pub mod renew_tasks;

pub mod prelude {
    pub use super::certificates::Entity as Certificates;
    pub use super::deploy_configs::Entity as DeployConfigs;
    pub use super::dns_providers::Entity as DnsProviders;
    pub use super::renew_tasks::Entity as RenewTasks;
}
