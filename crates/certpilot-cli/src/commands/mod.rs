pub mod context;
pub mod deploy;
pub mod generate_key;
pub mod renew;
pub mod run_once;
pub mod serve;
pub mod test_dns;

pub use deploy::DeployCommand;
pub use generate_key::GenerateKeyCommand;
pub use renew::RenewCommand;
pub use run_once::RunOnceCommand;
pub use serve::ServeCommand;
pub use test_dns::TestDnsCommand;
