//! Token exchange role and role alias management.
//!
//! The role is what the device ultimately assumes when it swaps its X.509
//! certificate for temporary credentials; the role alias is the indirection
//! the credentials provider hands out so the role can be rotated without
//! touching the fleet.

use crate::aws::AwsBackend;
use crate::aws::error::{AwsBackendError, classify_sdk_error};

/// Trust policy allowing the IoT credentials provider to assume the role.
const EXCHANGE_TRUST_POLICY: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Effect": "Allow",
      "Principal": { "Service": "credentials.iot.amazonaws.com" },
      "Action": "sts:AssumeRole"
    }
  ]
}"#;

/// Lifetime of the credentials vended through the role alias.
const CREDENTIAL_DURATION_SECONDS: i32 = 3600;

impl AwsBackend {
    /// Looks up the ARN of an existing role, mapping absence to `None`.
    pub(in crate::aws) async fn lookup_role_arn(
        &self,
        role_name: &str,
    ) -> Result<Option<String>, AwsBackendError> {
        match self.iam.get_role().role_name(role_name).send().await {
            Ok(output) => {
                let role = output.role().ok_or(AwsBackendError::MissingField {
                    operation: "GetRole",
                    field: "role",
                })?;
                Ok(Some(role.arn().to_owned()))
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_no_such_entity_exception()) =>
            {
                Ok(None)
            }
            Err(err) => Err(classify_sdk_error("GetRole", &err)),
        }
    }

    /// Returns the ARN of the token exchange role, creating it if absent.
    pub(in crate::aws) async fn ensure_exchange_role(
        &self,
        role_name: &str,
    ) -> Result<String, AwsBackendError> {
        if let Some(role_arn) = self.lookup_role_arn(role_name).await? {
            return Ok(role_arn);
        }
        let created = self
            .iam
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(EXCHANGE_TRUST_POLICY)
            .send()
            .await;
        match created {
            Ok(output) => {
                let role = output.role().ok_or(AwsBackendError::MissingField {
                    operation: "CreateRole",
                    field: "role",
                })?;
                Ok(role.arn().to_owned())
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_entity_already_exists_exception()) =>
            {
                // Lost a creation race; the winner's role serves equally well.
                self.lookup_role_arn(role_name).await?.ok_or_else(|| {
                    AwsBackendError::NotFound {
                        operation: "CreateRole",
                        message: format!("role {role_name} disappeared during creation"),
                    }
                })
            }
            Err(err) => Err(classify_sdk_error("CreateRole", &err)),
        }
    }

    /// Looks up the ARN of an existing role alias, mapping absence to `None`.
    pub(in crate::aws) async fn role_alias_arn(
        &self,
        alias_name: &str,
    ) -> Result<Option<String>, AwsBackendError> {
        match self
            .iot
            .describe_role_alias()
            .role_alias(alias_name)
            .send()
            .await
        {
            Ok(output) => {
                let description =
                    output
                        .role_alias_description()
                        .ok_or(AwsBackendError::MissingField {
                            operation: "DescribeRoleAlias",
                            field: "roleAliasDescription",
                        })?;
                let alias_arn =
                    description
                        .role_alias_arn()
                        .ok_or(AwsBackendError::MissingField {
                            operation: "DescribeRoleAlias",
                            field: "roleAliasArn",
                        })?;
                Ok(Some(alias_arn.to_owned()))
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_resource_not_found_exception()) =>
            {
                Ok(None)
            }
            Err(err) => Err(classify_sdk_error("DescribeRoleAlias", &err)),
        }
    }

    /// Returns the ARN of the role alias, creating it if absent.
    pub(in crate::aws) async fn ensure_role_alias(
        &self,
        alias_name: &str,
        role_arn: &str,
    ) -> Result<String, AwsBackendError> {
        if let Some(alias_arn) = self.role_alias_arn(alias_name).await? {
            return Ok(alias_arn);
        }
        let created = self
            .iot
            .create_role_alias()
            .role_alias(alias_name)
            .role_arn(role_arn)
            .credential_duration_seconds(CREDENTIAL_DURATION_SECONDS)
            .send()
            .await;
        match created {
            Ok(output) => {
                let alias_arn = output.role_alias_arn().ok_or(AwsBackendError::MissingField {
                    operation: "CreateRoleAlias",
                    field: "roleAliasArn",
                })?;
                Ok(alias_arn.to_owned())
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_resource_already_exists_exception()) =>
            {
                self.role_alias_arn(alias_name).await?.ok_or_else(|| {
                    AwsBackendError::NotFound {
                        operation: "CreateRoleAlias",
                        message: format!("role alias {alias_name} disappeared during creation"),
                    }
                })
            }
            Err(err) => Err(classify_sdk_error("CreateRoleAlias", &err)),
        }
    }
}
