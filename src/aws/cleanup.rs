//! Decommissioning operations over IAM and IoT Core.
//!
//! Every operation maps an already-absent resource to success so a sweep can
//! be re-run after a partial failure without tripping over its own progress.

use aws_sdk_iot::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_iot::types::CertificateStatus;

use crate::aws::AwsBackend;
use crate::aws::error::{AwsBackendError, classify_sdk_error};
use crate::backend::{BackendFuture, CleanupBackend};

/// Collapses a delete or detach result, treating absence as success.
fn absent_ok<T, E>(
    operation: &'static str,
    result: Result<T, SdkError<E>>,
    already_absent: fn(&E) -> bool,
) -> Result<(), AwsBackendError>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.as_service_error().is_some_and(already_absent) => Ok(()),
        Err(err) => Err(classify_sdk_error(operation, &err)),
    }
}

impl CleanupBackend for AwsBackend {
    type Error = AwsBackendError;

    fn thing_principals<'a>(
        &'a self,
        thing_name: &'a str,
    ) -> BackendFuture<'a, Vec<String>, Self::Error> {
        Box::pin(async move {
            match self
                .iot
                .list_thing_principals()
                .thing_name(thing_name)
                .send()
                .await
            {
                Ok(output) => Ok(output.principals().to_vec()),
                Err(err)
                    if err
                        .as_service_error()
                        .is_some_and(|service| service.is_resource_not_found_exception()) =>
                {
                    Ok(Vec::new())
                }
                Err(err) => Err(classify_sdk_error("ListThingPrincipals", &err)),
            }
        })
    }

    fn detach_thing_principal<'a>(
        &'a self,
        thing_name: &'a str,
        principal_arn: &'a str,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let result = self
                .iot
                .detach_thing_principal()
                .thing_name(thing_name)
                .principal(principal_arn)
                .send()
                .await;
            absent_ok("DetachThingPrincipal", result, |service| {
                service.is_resource_not_found_exception()
            })
        })
    }

    fn certificate_policies<'a>(
        &'a self,
        certificate_arn: &'a str,
    ) -> BackendFuture<'a, Vec<String>, Self::Error> {
        Box::pin(async move {
            match self
                .iot
                .list_attached_policies()
                .target(certificate_arn)
                .send()
                .await
            {
                Ok(output) => Ok(output
                    .policies()
                    .iter()
                    .filter_map(|policy| policy.policy_name().map(ToOwned::to_owned))
                    .collect()),
                Err(err)
                    if err
                        .as_service_error()
                        .is_some_and(|service| service.is_resource_not_found_exception()) =>
                {
                    Ok(Vec::new())
                }
                Err(err) => Err(classify_sdk_error("ListAttachedPolicies", &err)),
            }
        })
    }

    fn detach_policy<'a>(
        &'a self,
        policy_name: &'a str,
        target_arn: &'a str,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let result = self
                .iot
                .detach_policy()
                .policy_name(policy_name)
                .target(target_arn)
                .send()
                .await;
            absent_ok("DetachPolicy", result, |service| {
                service.code() == Some("ResourceNotFoundException")
            })
        })
    }

    fn deactivate_certificate<'a>(
        &'a self,
        certificate_id: &'a str,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let result = self
                .iot
                .update_certificate()
                .certificate_id(certificate_id)
                .new_status(CertificateStatus::Inactive)
                .send()
                .await;
            absent_ok("UpdateCertificate", result, |service| {
                service.is_resource_not_found_exception()
            })
        })
    }

    fn delete_certificate<'a>(
        &'a self,
        certificate_id: &'a str,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let result = self
                .iot
                .delete_certificate()
                .certificate_id(certificate_id)
                .send()
                .await;
            absent_ok("DeleteCertificate", result, |service| {
                service.is_resource_not_found_exception()
            })
        })
    }

    fn delete_policy<'a>(&'a self, policy_name: &'a str) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let result = self
                .iot
                .delete_policy()
                .policy_name(policy_name)
                .send()
                .await;
            absent_ok("DeletePolicy", result, |service| {
                service.is_resource_not_found_exception()
            })
        })
    }

    fn delete_thing<'a>(&'a self, thing_name: &'a str) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let result = self.iot.delete_thing().thing_name(thing_name).send().await;
            absent_ok("DeleteThing", result, |service| {
                service.is_resource_not_found_exception()
            })
        })
    }

    fn delete_role_alias<'a>(
        &'a self,
        alias_name: &'a str,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let result = self
                .iot
                .delete_role_alias()
                .role_alias(alias_name)
                .send()
                .await;
            absent_ok("DeleteRoleAlias", result, |service| {
                service.is_resource_not_found_exception()
            })
        })
    }

    fn delete_role<'a>(&'a self, role_name: &'a str) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let result = self.iam.delete_role().role_name(role_name).send().await;
            absent_ok("DeleteRole", result, |service| {
                service.is_no_such_entity_exception()
            })
        })
    }
}
