//! IoT policy documents and attachment.

use serde_json::json;

use crate::aws::AwsBackend;
use crate::aws::error::{AwsBackendError, classify_sdk_error};

/// Renders the device policy granting the agent its messaging permissions.
pub(in crate::aws) fn device_policy_document() -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": [
                    "iot:Connect",
                    "iot:Publish",
                    "iot:Subscribe",
                    "iot:Receive"
                ],
                "Resource": "*"
            }
        ]
    })
    .to_string()
}

/// Renders the policy allowing certificate holders to assume the role alias.
pub(in crate::aws) fn exchange_policy_document(alias_arn: &str) -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": "iot:AssumeRoleWithCertificate",
                "Resource": alias_arn
            }
        ]
    })
    .to_string()
}

impl AwsBackend {
    /// Creates an IoT policy, reusing one that already exists.
    ///
    /// An existing policy keeps its current document; drift is left for an
    /// operator to resolve rather than silently rewritten.
    pub(in crate::aws) async fn ensure_policy(
        &self,
        policy_name: &str,
        document: &str,
    ) -> Result<(), AwsBackendError> {
        let created = self
            .iot
            .create_policy()
            .policy_name(policy_name)
            .policy_document(document)
            .send()
            .await;
        match created {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_resource_already_exists_exception()) =>
            {
                Ok(())
            }
            Err(err) => Err(classify_sdk_error("CreatePolicy", &err)),
        }
    }

    /// Attaches a policy to a certificate.
    ///
    /// The service treats a repeated attachment as a no-op.
    pub(in crate::aws) async fn attach_policy_to_target(
        &self,
        policy_name: &str,
        target_arn: &str,
    ) -> Result<(), AwsBackendError> {
        self.iot
            .attach_policy()
            .policy_name(policy_name)
            .target(target_arn)
            .send()
            .await
            .map_err(|err| classify_sdk_error("AttachPolicy", &err))?;
        Ok(())
    }
}
