use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ======== DNS PROVIDERS TABLE ========
        manager
            .create_table(
                Table::create()
                    .table(DnsProviders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DnsProviders::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DnsProviders::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(DnsProviders::ProviderType)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(ColumnDef::new(DnsProviders::Config).text().not_null())
                    .col(ColumnDef::new(DnsProviders::Email).string_len(255).null())
                    .col(ColumnDef::new(DnsProviders::Phone).string_len(64).null())
                    .col(
                        ColumnDef::new(DnsProviders::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(DnsProviders::LastTestOk).boolean().null())
                    .col(
                        ColumnDef::new(DnsProviders::LastTestAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DnsProviders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DnsProviders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // ======== CERTIFICATES TABLE ========
        manager
            .create_table(
                Table::create()
                    .table(Certificates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Certificates::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Certificates::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Certificates::Domain).string_len(255).not_null())
                    .col(ColumnDef::new(Certificates::SanDomains).json().not_null())
                    .col(
                        ColumnDef::new(Certificates::SourceType)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Certificates::CaProvider)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Certificates::KeyAlgorithm)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Certificates::DnsProviderId).integer().null())
                    .col(ColumnDef::new(Certificates::AcmeEmail).string_len(255).null())
                    .col(ColumnDef::new(Certificates::CloudAccountId).integer().null())
                    .col(ColumnDef::new(Certificates::CloudCertId).string_len(255).null())
                    .col(
                        ColumnDef::new(Certificates::Status)
                            .string_len(20)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(Certificates::AutoRenew)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Certificates::RenewDaysBefore)
                            .integer()
                            .not_null()
                            .default(30),
                    )
                    .col(ColumnDef::new(Certificates::CertificatePem).text().null())
                    .col(ColumnDef::new(Certificates::PrivateKeyPem).text().null())
                    .col(ColumnDef::new(Certificates::ChainPem).text().null())
                    .col(
                        ColumnDef::new(Certificates::NotBefore)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Certificates::NotAfter)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Certificates::Fingerprint).string_len(128).null())
                    .col(ColumnDef::new(Certificates::Issuer).text().null())
                    .col(ColumnDef::new(Certificates::Subject).text().null())
                    .col(ColumnDef::new(Certificates::LastError).text().null())
                    .col(
                        ColumnDef::new(Certificates::LastRenewAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Certificates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Certificates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_certificates_dns_provider_id")
                            .from(Certificates::Table, Certificates::DnsProviderId)
                            .to(DnsProviders::Table, DnsProviders::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_certificates_status")
                    .table(Certificates::Table)
                    .col(Certificates::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_certificates_not_after")
                    .table(Certificates::Table)
                    .col(Certificates::NotAfter)
                    .to_owned(),
            )
            .await?;

        // ======== RENEW TASKS TABLE ========
        manager
            .create_table(
                Table::create()
                    .table(RenewTasks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RenewTasks::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RenewTasks::CertificateId).integer().not_null())
                    .col(ColumnDef::new(RenewTasks::TaskType).string_len(20).not_null())
                    .col(ColumnDef::new(RenewTasks::Status).string_len(20).not_null())
                    .col(
                        ColumnDef::new(RenewTasks::TriggerType)
                            .string_len(20)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(RenewTasks::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RenewTasks::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(RenewTasks::ErrorMessage).text().null())
                    .col(ColumnDef::new(RenewTasks::Result).json().null())
                    .col(
                        ColumnDef::new(RenewTasks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(RenewTasks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_renew_tasks_certificate_id")
                            .from(RenewTasks::Table, RenewTasks::CertificateId)
                            .to(Certificates::Table, Certificates::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_renew_tasks_certificate_id")
                    .table(RenewTasks::Table)
                    .col(RenewTasks::CertificateId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_renew_tasks_status")
                    .table(RenewTasks::Table)
                    .col(RenewTasks::Status)
                    .to_owned(),
            )
            .await?;

        // ======== DEPLOY CONFIGS TABLE ========
        manager
            .create_table(
                Table::create()
                    .table(DeployConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DeployConfigs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DeployConfigs::CertificateId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DeployConfigs::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(DeployConfigs::DeployType)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(ColumnDef::new(DeployConfigs::TargetConfig).json().not_null())
                    .col(
                        ColumnDef::new(DeployConfigs::AutoDeploy)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(DeployConfigs::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(DeployConfigs::LastDeployOk).boolean().null())
                    .col(
                        ColumnDef::new(DeployConfigs::LastDeployAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(DeployConfigs::LastError).text().null())
                    .col(
                        ColumnDef::new(DeployConfigs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DeployConfigs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deploy_configs_certificate_id")
                            .from(DeployConfigs::Table, DeployConfigs::CertificateId)
                            .to(Certificates::Table, Certificates::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deploy_configs_certificate_id")
                    .table(DeployConfigs::Table)
                    .col(DeployConfigs::CertificateId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DeployConfigs::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(RenewTasks::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Certificates::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DnsProviders::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum DnsProviders {
    Table,
    Id,
    Name,
    ProviderType,
    Config,
    Email,
    Phone,
    Enabled,
    LastTestOk,
    LastTestAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Certificates {
    Table,
    Id,
    Name,
    Domain,
    SanDomains,
    SourceType,
    CaProvider,
    KeyAlgorithm,
    DnsProviderId,
    AcmeEmail,
    CloudAccountId,
    CloudCertId,
    Status,
    AutoRenew,
    RenewDaysBefore,
    CertificatePem,
    PrivateKeyPem,
    ChainPem,
    NotBefore,
    NotAfter,
    Fingerprint,
    Issuer,
    Subject,
    LastError,
    LastRenewAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum RenewTasks {
    Table,
    Id,
    CertificateId,
    TaskType,
    Status,
    TriggerType,
    StartedAt,
    FinishedAt,
    ErrorMessage,
    Result,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DeployConfigs {
    Table,
    Id,
    CertificateId,
    Name,
    DeployType,
    TargetConfig,
    AutoDeploy,
    Enabled,
    LastDeployOk,
    LastDeployAt,
    LastError,
    CreatedAt,
    UpdatedAt,
}
