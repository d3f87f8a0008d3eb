//! Error taxonomy for Reina.
//!
//! Two layers, mirroring how a run fails:
//! - [`ReinaError`]: precondition and run-level failures. These abort the
//!   whole run before any app is provisioned.
//! - [`JobError`]: anything that goes wrong while provisioning a single
//!   project. These are captured into that job's outcome and never cross a
//!   job boundary.

use thiserror::Error;

/// Errors returned by the hosting platform collaborator.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The API answered with a non-success status.
    ///
    /// Displays the raw response payload when one was returned, since that is
    /// what the platform uses to explain the failure.
    #[error("{}", api_message(.status, .body))]
    Api { status: u16, body: String },

    /// Transport-level failure (connection, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(String),

    /// The response could not be decoded.
    #[error("failed to decode platform response: {0}")]
    Decode(String),
}

fn api_message(status: &u16, body: &str) -> String {
    if body.trim().is_empty() {
        format!("platform API returned status {status}")
    } else {
        body.to_string()
    }
}

/// Errors returned by the source-control collaborator.
#[derive(Debug, Error)]
pub enum ScmError {
    /// A git invocation exited unsuccessfully; `message` is the tool's own output.
    #[error("{message}")]
    Command { command: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single provisioning job.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Scm(#[from] ScmError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// A copy directive referenced a variable the source app does not have.
    ///
    /// Usually the source app has not been provisioned yet.
    #[error("variable {key} not found on {app}")]
    MissingVariable { app: String, key: String },

    #[error("invalid manifest: {0}")]
    Manifest(String),
}

/// Run-level errors. Any of these aborts before provisioning starts.
#[derive(Debug, Error)]
pub enum ReinaError {
    #[error("missing platform credential: set {0}")]
    MissingCredential(String),

    #[error("given PR number should be greater than 0, got {0}")]
    InvalidPrNumber(i64),

    #[error("app name {app_name} is {len} characters, must be shorter than {limit}")]
    AppNameTooLong {
        app_name: String,
        len: usize,
        limit: usize,
    },

    #[error("app name {0} is derived by more than one project")]
    DuplicateAppName(String),

    #[error("deletion of existing apps was not confirmed")]
    ConfirmationDeclined,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for run-level operations.
pub type Result<T> = std::result::Result<T, ReinaError>;

/// Result type for per-job operations.
pub type JobResult<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_displays_response_body() {
        let err = PlatformError::Api {
            status: 422,
            body: r#"{"id":"invalid_params","message":"Name is already taken"}"#.to_string(),
        };
        assert!(err.to_string().contains("Name is already taken"));
    }

    #[test]
    fn test_api_error_without_body_displays_status() {
        let err = PlatformError::Api {
            status: 503,
            body: String::new(),
        };
        assert_eq!(err.to_string(), "platform API returned status 503");
    }

    #[test]
    fn test_scm_error_displays_raw_tool_message() {
        let err: JobError = ScmError::Command {
            command: "git pull origin feature".to_string(),
            message: "fatal: couldn't find remote ref feature".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "fatal: couldn't find remote ref feature");
    }

    #[test]
    fn test_app_name_too_long_displays_name() {
        let err = ReinaError::AppNameTooLong {
            app_name: "stg-very-long-project-name-1234".to_string(),
            len: 31,
            limit: 30,
        };
        let msg = err.to_string();
        assert!(msg.contains("stg-very-long-project-name-1234"));
        assert!(msg.contains("31"));
    }
}
