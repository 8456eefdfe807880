//! Account endpoint discovery.

use crate::aws::AwsBackend;
use crate::aws::error::{AwsBackendError, classify_sdk_error};

/// Endpoint type for the MQTT data plane.
pub(in crate::aws) const DATA_ENDPOINT_TYPE: &str = "iot:Data-ATS";

/// Endpoint type for the credentials provider.
pub(in crate::aws) const CREDENTIALS_ENDPOINT_TYPE: &str = "iot:CredentialProvider";

impl AwsBackend {
    /// Looks up the account's address for the given endpoint type.
    pub(in crate::aws) async fn endpoint_address(
        &self,
        endpoint_type: &'static str,
    ) -> Result<String, AwsBackendError> {
        let output = self
            .iot
            .describe_endpoint()
            .endpoint_type(endpoint_type)
            .send()
            .await
            .map_err(|err| classify_sdk_error("DescribeEndpoint", &err))?;
        let address = output
            .endpoint_address()
            .ok_or(AwsBackendError::MissingField {
                operation: "DescribeEndpoint",
                field: "endpointAddress",
            })?;
        Ok(address.to_owned())
    }
}
