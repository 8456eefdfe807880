//! Decommission sweep for a device's cloud identity resources.
//!
//! Provisioning leaves behind an IAM role, an IoT role alias, a thing,
//! certificates and policies. The janitor removes them in dependency order:
//! principals are detached before their certificates are deleted, and
//! policies are detached before the policies themselves go. Backends treat
//! absent resources as already clean, so a sweep interrupted halfway can
//! simply be re-run.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::backend::{BackendError, CleanupBackend, DeviceRequest};

/// Resource names a decommission sweep targets.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JanitorConfig {
    /// Device whose resources are removed; doubles as the thing name.
    pub device_name: String,
    /// IAM role created for token exchange.
    pub role_name: String,
    /// IoT role alias pointing at the role.
    pub role_alias: String,
    /// IoT policy granting device connectivity.
    pub device_policy: String,
    /// IoT policy granting credential exchange.
    pub exchange_policy: String,
}

impl JanitorConfig {
    /// Derives the conventional resource names for `device_name`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidDeviceName`] when the name cannot have
    /// been used to provision anything.
    pub fn for_device(device_name: &str) -> Result<Self, BackendError> {
        let request = DeviceRequest::builder().device_name(device_name).build()?;
        Ok(Self::from_request(&request))
    }

    /// Takes the resource names from an assembled provisioning request.
    #[must_use]
    pub fn from_request(request: &DeviceRequest) -> Self {
        Self {
            device_name: request.device_name.clone(),
            role_name: request.role_name.clone(),
            role_alias: request.role_alias.clone(),
            device_policy: request.device_policy.clone(),
            exchange_policy: request.exchange_policy.clone(),
        }
    }
}

/// Tallies of what a decommission sweep removed.
///
/// Deletes are idempotent, so the tallies describe what the sweep processed
/// rather than what the cloud previously held.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DecommissionSummary {
    /// Certificates detached from the thing.
    pub detached_certificates: usize,
    /// Certificates deactivated and deleted.
    pub deleted_certificates: usize,
    /// Policies deleted, attached ones plus the conventional pair.
    pub deleted_policies: usize,
    /// Whether the role alias delete completed.
    pub deleted_role_alias: bool,
    /// Whether the role delete completed.
    pub deleted_role: bool,
    /// Whether the thing delete completed.
    pub deleted_thing: bool,
}

/// Errors returned by the janitor.
#[derive(Debug, Error)]
pub enum JanitorError<E: std::error::Error + 'static> {
    /// Raised when a decommission operation fails.
    #[error("failed to {action} {resource}: {source}")]
    Backend {
        /// Operation that failed.
        action: &'static str,
        /// Resource the operation targeted.
        resource: String,
        /// Error reported by the backend.
        #[source]
        source: E,
    },
    /// Raised when a principal ARN does not name a certificate.
    #[error("cannot derive a certificate id from principal {principal}")]
    MalformedPrincipal {
        /// Principal ARN returned by the thing listing.
        principal: String,
    },
    /// Raised when resources remain attached after the sweep.
    #[error("resources remain after decommission sweep: {message}")]
    NotClean {
        /// Description of what remains.
        message: String,
    },
}

/// Removes a device's cloud identity resources through a [`CleanupBackend`].
#[derive(Clone, Debug)]
pub struct Janitor<B: CleanupBackend> {
    config: JanitorConfig,
    backend: B,
}

impl<B: CleanupBackend> Janitor<B> {
    /// Creates a janitor for the given resource names and backend.
    #[must_use]
    pub const fn new(config: JanitorConfig, backend: B) -> Self {
        Self { config, backend }
    }

    /// Performs a sweep and returns what was removed.
    ///
    /// The sweep is ordered: certificates are detached from the thing,
    /// stripped of their policies, deactivated and deleted; then the
    /// policies, the role alias, the role and the thing go. The sweep fails
    /// if anything is still attached afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`JanitorError`] when the backend refuses an operation, a
    /// principal ARN is malformed, or resources remain after the sweep.
    pub async fn sweep(&self) -> Result<DecommissionSummary, JanitorError<B::Error>> {
        let mut summary = DecommissionSummary::default();

        let principals = self.list_principals().await?;
        self.detach_principals(&principals, &mut summary).await?;
        let attached = self.strip_certificate_policies(&principals).await?;
        self.remove_certificates(&principals, &mut summary).await?;
        self.remove_policies(attached, &mut summary).await?;

        self.backend
            .delete_role_alias(&self.config.role_alias)
            .await
            .map_err(|source| {
                backend_failure("delete role alias", &self.config.role_alias, source)
            })?;
        summary.deleted_role_alias = true;

        self.backend
            .delete_role(&self.config.role_name)
            .await
            .map_err(|source| backend_failure("delete role", &self.config.role_name, source))?;
        summary.deleted_role = true;

        self.backend
            .delete_thing(&self.config.device_name)
            .await
            .map_err(|source| backend_failure("delete thing", &self.config.device_name, source))?;
        summary.deleted_thing = true;

        self.confirm_clean().await?;
        Ok(summary)
    }

    async fn list_principals(&self) -> Result<Vec<String>, JanitorError<B::Error>> {
        self.backend
            .thing_principals(&self.config.device_name)
            .await
            .map_err(|source| {
                backend_failure("list principals of", &self.config.device_name, source)
            })
    }

    async fn detach_principals(
        &self,
        principals: &[String],
        summary: &mut DecommissionSummary,
    ) -> Result<(), JanitorError<B::Error>> {
        for principal in principals {
            self.backend
                .detach_thing_principal(&self.config.device_name, principal)
                .await
                .map_err(|source| backend_failure("detach principal", principal, source))?;
            summary.detached_certificates += 1;
        }
        Ok(())
    }

    /// Detaches every policy found on the certificates, returning the names
    /// so the delete pass covers manually attached ones too.
    async fn strip_certificate_policies(
        &self,
        principals: &[String],
    ) -> Result<BTreeSet<String>, JanitorError<B::Error>> {
        let mut names = BTreeSet::new();
        for principal in principals {
            let attached = self
                .backend
                .certificate_policies(principal)
                .await
                .map_err(|source| backend_failure("list policies of", principal, source))?;
            for policy in attached {
                self.backend
                    .detach_policy(&policy, principal)
                    .await
                    .map_err(|source| backend_failure("detach policy", &policy, source))?;
                names.insert(policy);
            }
        }
        Ok(names)
    }

    async fn remove_certificates(
        &self,
        principals: &[String],
        summary: &mut DecommissionSummary,
    ) -> Result<(), JanitorError<B::Error>> {
        for principal in principals {
            let Some(certificate_id) = certificate_id_from_arn(principal) else {
                return Err(JanitorError::MalformedPrincipal {
                    principal: principal.clone(),
                });
            };
            self.backend
                .deactivate_certificate(certificate_id)
                .await
                .map_err(|source| {
                    backend_failure("deactivate certificate", certificate_id, source)
                })?;
            self.backend
                .delete_certificate(certificate_id)
                .await
                .map_err(|source| backend_failure("delete certificate", certificate_id, source))?;
            summary.deleted_certificates += 1;
        }
        Ok(())
    }

    async fn remove_policies(
        &self,
        attached: BTreeSet<String>,
        summary: &mut DecommissionSummary,
    ) -> Result<(), JanitorError<B::Error>> {
        let mut names = attached;
        names.insert(self.config.device_policy.clone());
        names.insert(self.config.exchange_policy.clone());
        for name in &names {
            self.backend
                .delete_policy(name)
                .await
                .map_err(|source| backend_failure("delete policy", name, source))?;
            summary.deleted_policies += 1;
        }
        Ok(())
    }

    async fn confirm_clean(&self) -> Result<(), JanitorError<B::Error>> {
        let remaining = self.list_principals().await?;
        if remaining.is_empty() {
            return Ok(());
        }
        Err(JanitorError::NotClean {
            message: format!(
                "certificates still attached to {}: {}",
                self.config.device_name,
                remaining.join(", ")
            ),
        })
    }
}

fn backend_failure<E: std::error::Error + 'static>(
    action: &'static str,
    resource: &str,
    source: E,
) -> JanitorError<E> {
    JanitorError::Backend {
        action,
        resource: resource.to_owned(),
        source,
    }
}

/// Extracts the certificate id from a principal ARN of the form
/// `arn:…:cert/<id>`.
fn certificate_id_from_arn(principal: &str) -> Option<&str> {
    principal
        .rsplit_once('/')
        .map(|(_, id)| id)
        .filter(|id| !id.is_empty())
}
