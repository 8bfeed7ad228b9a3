//! Certificate state rules
//!
//! `pending` and `error` are set by task outcomes. The other statuses follow
//! from `not_after` and are recomputed by [`reclassify`] on every scheduler
//! cycle.

use certpilot_core::UtcDateTime;
use chrono::Duration;
use tracing::{debug, warn};

use crate::errors::RepositoryError;
use crate::models::{Certificate, CertificateStatus};
use crate::repository::CertificateRepository;

/// New status for a certificate, or `None` when it should stay as it is.
pub fn classify(
    status: CertificateStatus,
    not_after: Option<UtcDateTime>,
    renew_days_before: i32,
    now: UtcDateTime,
) -> Option<CertificateStatus> {
    let not_after = not_after?;
    if matches!(status, CertificateStatus::Expired | CertificateStatus::Error) {
        return None;
    }
    if not_after < now {
        return Some(CertificateStatus::Expired);
    }
    if status == CertificateStatus::Active && not_after <= renewal_horizon(now, renew_days_before)
    {
        return Some(CertificateStatus::Expiring);
    }
    None
}

/// Status of freshly imported material
pub fn status_from_expiry(
    not_after: UtcDateTime,
    renew_days_before: i32,
    now: UtcDateTime,
) -> CertificateStatus {
    let days_left = (not_after - now).num_days();
    if days_left <= 0 {
        CertificateStatus::Expired
    } else if days_left <= i64::from(renew_days_before) {
        CertificateStatus::Expiring
    } else {
        CertificateStatus::Active
    }
}

/// Whether the scheduler should renew `cert` at `now`
pub fn is_due_for_renewal(cert: &Certificate, now: UtcDateTime) -> bool {
    cert.auto_renew
        && cert.status != CertificateStatus::Error
        && cert
            .not_after
            .is_some_and(|t| t <= renewal_horizon(now, cert.renew_days_before))
}

fn renewal_horizon(now: UtcDateTime, renew_days_before: i32) -> UtcDateTime {
    now + Duration::days(i64::from(renew_days_before.max(0)))
}

/// Applies [`classify`] to every certificate it can change, returning how
/// many moved. A failed update is logged and skipped.
pub async fn reclassify(
    certificates: &dyn CertificateRepository,
    now: UtcDateTime,
) -> Result<usize, RepositoryError> {
    let mut changed = 0;
    for cert in certificates.list_classifiable().await? {
        let Some(next) = classify(cert.status, cert.not_after, cert.renew_days_before, now) else {
            continue;
        };
        match certificates
            .update_status(cert.id, next, cert.last_error.clone())
            .await
        {
            Ok(()) => {
                debug!(
                    "Certificate {} ({}) moved from {} to {}",
                    cert.id, cert.domain, cert.status, next
                );
                changed += 1;
            }
            Err(e) => warn!("Failed to update status of certificate {}: {}", cert.id, e),
        }
    }
    Ok(changed)
}
