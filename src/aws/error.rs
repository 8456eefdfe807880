//! Error types and failure classification for the AWS backend.
//!
//! Service errors carry the name of the API operation that raised them so a
//! retry observer can report which call is being re-attempted. Classification
//! follows the service's own signals: throttling and server faults are worth
//! retrying, everything the caller got wrong is not.

use aws_sdk_iot::error::{ProvideErrorMetadata, SdkError};
use thiserror::Error;

use crate::backend::BackendError;
use crate::retry::{ClassifyError, ErrorClass};

/// Service error codes that signal request throttling.
const THROTTLING_CODES: [&str; 4] = [
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
];

/// Service error codes that signal a fault on the service side.
const SERVER_FAULT_CODES: [&str; 4] = [
    "InternalFailure",
    "InternalFailureException",
    "InternalServerException",
    "ServiceUnavailableException",
];

/// Service error codes that signal refused authorisation.
const ACCESS_DENIED_CODES: [&str; 4] = [
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedException",
    "ForbiddenException",
];

/// Service error codes that signal a missing resource.
const NOT_FOUND_CODES: [&str; 2] = ["ResourceNotFoundException", "NoSuchEntity"];

/// Errors raised by the AWS identity backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AwsBackendError {
    /// Raised when the cloud configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when a provisioning request fails validation.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Raised when the service refuses the caller's credentials.
    #[error("{operation} was denied: {message}")]
    AccessDenied {
        /// API operation that was refused.
        operation: &'static str,
        /// Diagnostic message returned by the service.
        message: String,
    },
    /// Raised when the service throttles the request rate.
    #[error("{operation} was throttled: {message}")]
    Throttled {
        /// API operation that was throttled.
        operation: &'static str,
        /// Diagnostic message returned by the service.
        message: String,
    },
    /// Raised when the service or the network path to it misbehaves.
    #[error("{operation} is unavailable: {message}")]
    Unavailable {
        /// API operation that could not be completed.
        operation: &'static str,
        /// Diagnostic message describing the failure.
        message: String,
    },
    /// Raised when a resource the operation depends on does not exist.
    #[error("{operation} found no matching resource: {message}")]
    NotFound {
        /// API operation that came up empty.
        operation: &'static str,
        /// Diagnostic message describing what was missing.
        message: String,
    },
    /// Raised when the service rejects the request outright.
    #[error("{operation} was rejected: {message}")]
    Rejected {
        /// API operation that was rejected.
        operation: &'static str,
        /// Diagnostic message returned by the service.
        message: String,
    },
    /// Raised when a response omits a field the workflow needs.
    #[error("{operation} response did not include {field}")]
    MissingField {
        /// API operation that produced the response.
        operation: &'static str,
        /// Name of the absent response field.
        field: &'static str,
    },
}

impl ClassifyError for AwsBackendError {
    /// Splits errors into those worth retrying and those that are not.
    ///
    /// Throttling and service faults clear up on their own; every other
    /// variant reflects a request or environment that a retry cannot fix.
    fn classify(&self) -> ErrorClass {
        match self {
            Self::Throttled { .. } | Self::Unavailable { .. } => ErrorClass::Transient,
            Self::Config(_)
            | Self::Validation(_)
            | Self::AccessDenied { .. }
            | Self::NotFound { .. }
            | Self::Rejected { .. }
            | Self::MissingField { .. } => ErrorClass::Fatal,
        }
    }
}

impl From<BackendError> for AwsBackendError {
    fn from(value: BackendError) -> Self {
        Self::Validation(value.to_string())
    }
}

/// Maps an SDK failure onto the backend error taxonomy.
///
/// Transport-level failures (dispatch, timeout, malformed responses) are
/// treated as unavailability. Service errors are sorted by their error code,
/// falling back to the HTTP status class when the code is unrecognised.
pub(in crate::aws) fn classify_sdk_error<E>(
    operation: &'static str,
    error: &SdkError<E>,
) -> AwsBackendError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match error {
        SdkError::ServiceError(context) => {
            let code = context.err().code().unwrap_or("");
            let message = context
                .err()
                .message()
                .map_or_else(|| sdk_error_message(error), ToOwned::to_owned);
            if THROTTLING_CODES.contains(&code) {
                AwsBackendError::Throttled { operation, message }
            } else if SERVER_FAULT_CODES.contains(&code)
                || context.raw().status().is_server_error()
            {
                AwsBackendError::Unavailable { operation, message }
            } else if ACCESS_DENIED_CODES.contains(&code) {
                AwsBackendError::AccessDenied { operation, message }
            } else if NOT_FOUND_CODES.contains(&code) {
                AwsBackendError::NotFound { operation, message }
            } else {
                AwsBackendError::Rejected { operation, message }
            }
        }
        SdkError::ConstructionFailure(_) => AwsBackendError::Rejected {
            operation,
            message: sdk_error_message(error),
        },
        _ => AwsBackendError::Unavailable {
            operation,
            message: sdk_error_message(error),
        },
    }
}

/// Renders an SDK error together with its source chain.
fn sdk_error_message<E>(error: &SdkError<E>) -> String
where
    E: std::error::Error + 'static,
{
    let mut rendered = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}
