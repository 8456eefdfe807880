//! Thing registration and certificate issuance.

use crate::aws::AwsBackend;
use crate::aws::error::{AwsBackendError, classify_sdk_error};
use crate::backend::{CertificateMaterial, KeyMaterial};

impl AwsBackend {
    /// Reports whether a thing is registered.
    pub(in crate::aws) async fn thing_is_registered(
        &self,
        thing_name: &str,
    ) -> Result<bool, AwsBackendError> {
        match self
            .iot
            .describe_thing()
            .thing_name(thing_name)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_resource_not_found_exception()) =>
            {
                Ok(false)
            }
            Err(err) => Err(classify_sdk_error("DescribeThing", &err)),
        }
    }

    /// Returns the registered thing name, creating the thing if absent.
    pub(in crate::aws) async fn ensure_thing(
        &self,
        thing_name: &str,
    ) -> Result<String, AwsBackendError> {
        if self.thing_is_registered(thing_name).await? {
            return Ok(thing_name.to_owned());
        }
        let created = self.iot.create_thing().thing_name(thing_name).send().await;
        match created {
            Ok(output) => {
                let registered = output.thing_name().ok_or(AwsBackendError::MissingField {
                    operation: "CreateThing",
                    field: "thingName",
                })?;
                Ok(registered.to_owned())
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_resource_already_exists_exception()) =>
            {
                Ok(thing_name.to_owned())
            }
            Err(err) => Err(classify_sdk_error("CreateThing", &err)),
        }
    }

    /// Issues a fresh, active certificate together with its key pair.
    ///
    /// The service returns the private key exactly once; it is wrapped in
    /// [`KeyMaterial`] immediately so it cannot reach logs or serialised
    /// records.
    pub(in crate::aws) async fn issue_certificate(
        &self,
    ) -> Result<CertificateMaterial, AwsBackendError> {
        let output = self
            .iot
            .create_keys_and_certificate()
            .set_as_active(true)
            .send()
            .await
            .map_err(|err| classify_sdk_error("CreateKeysAndCertificate", &err))?;
        let certificate_id = output
            .certificate_id()
            .ok_or(AwsBackendError::MissingField {
                operation: "CreateKeysAndCertificate",
                field: "certificateId",
            })?
            .to_owned();
        let certificate_arn = output
            .certificate_arn()
            .ok_or(AwsBackendError::MissingField {
                operation: "CreateKeysAndCertificate",
                field: "certificateArn",
            })?
            .to_owned();
        let certificate_pem = output
            .certificate_pem()
            .ok_or(AwsBackendError::MissingField {
                operation: "CreateKeysAndCertificate",
                field: "certificatePem",
            })?
            .to_owned();
        let key_pair = output.key_pair().ok_or(AwsBackendError::MissingField {
            operation: "CreateKeysAndCertificate",
            field: "keyPair",
        })?;
        let private_key = key_pair.private_key().ok_or(AwsBackendError::MissingField {
            operation: "CreateKeysAndCertificate",
            field: "privateKey",
        })?;
        Ok(CertificateMaterial {
            certificate_id,
            certificate_arn,
            certificate_pem,
            private_key: KeyMaterial::new(private_key.to_owned()),
        })
    }

    /// Attaches a certificate to a thing as its principal.
    ///
    /// The service treats a repeated attachment as a no-op, so this needs no
    /// existence check of its own.
    pub(in crate::aws) async fn attach_certificate(
        &self,
        thing_name: &str,
        certificate_arn: &str,
    ) -> Result<(), AwsBackendError> {
        self.iot
            .attach_thing_principal()
            .thing_name(thing_name)
            .principal(certificate_arn)
            .send()
            .await
            .map_err(|err| classify_sdk_error("AttachThingPrincipal", &err))?;
        Ok(())
    }
}
