//! Error types for the Kafka reconciliation agent

use std::time::Duration;

use thiserror::Error;

/// HTTP status the cluster API returns when the agent lacks permission
pub const CODE_FORBIDDEN: u16 = 403;
/// HTTP status the cluster API returns for a missing object
pub const CODE_NOT_FOUND: u16 = 404;
/// HTTP status the cluster API returns for an invalid object (e.g. port clash)
pub const CODE_UNPROCESSABLE: u16 = 422;

/// Error variants are named with the `Error` suffix where they wrap a foreign error.
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    /// Data this pass depends on has not been published yet
    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    /// A structured failure returned by the cluster object API
    #[error("Cluster API error ({code} {reason}): {message}")]
    ApiError {
        code: u16,
        reason: String,
        message: String,
    },

    /// The cluster API could not be reached at all
    #[error("Cluster API transport error: {0}")]
    TransportError(String),

    /// A node port is held by an object other than the one we are applying
    #[error("Node port {port} for service {service} is allocated elsewhere")]
    PortConflict { service: String, port: i32 },

    /// A unit ordinal or mechanism index falls outside the node port plan
    #[error("Node port out of range: {0}")]
    NodePortOutOfRange(String),

    /// keytool/openssl failed in a way that is not an idempotent replay
    #[error("Crypto tool `{tool}` failed: {detail}")]
    CryptoToolFailure { tool: String, detail: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl Error {
    /// Build an API error from its parts
    pub fn api(code: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ApiError {
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Check if this error indicates a resource was not found
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::ApiError { code, .. } => *code == CODE_NOT_FOUND,
            _ => false,
        }
    }

    /// Check if the cluster API refused the request for lack of permission
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Error::ApiError { code, .. } if *code == CODE_FORBIDDEN)
    }

    /// Check if the cluster API rejected a create because the node port is taken
    pub fn is_port_allocated(&self) -> bool {
        matches!(
            self,
            Error::ApiError { code, message, .. }
                if *code == CODE_UNPROCESSABLE && message.contains("port is already allocated")
        )
    }

    /// Missing prerequisites defer the pass instead of failing it
    pub fn is_missing_prerequisite(&self) -> bool {
        matches!(self, Error::MissingPrerequisite(_))
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ApiError { code, .. } => {
                // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                if (400..500).contains(code) {
                    return *code == 409 || *code == 429;
                }
                true
            }
            Error::TransportError(_) => true,
            Error::MissingPrerequisite(_) => true,
            // Crypto artifacts are left in their last good state, so a rerun is safe
            Error::CryptoToolFailure { .. } => true,
            Error::IoError(_) => true,
            Error::NotFound(_) => true,
            Error::PortConflict { .. } => false,
            Error::NodePortOutOfRange(_) => false,
            Error::SerializationError(_) => false,
            Error::InvalidConfig(_) => false,
            Error::ValidationError(_) => false,
        }
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => Error::ApiError {
                code: resp.code,
                reason: resp.reason.clone(),
                message: resp.message.clone(),
            },
            other => Error::TransportError(other.to_string()),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attempts beyond this no longer grow the delay; keeps `powi` finite
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(MAX_BACKOFF_EXPONENT) as i32;
        let base_delay_secs = (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error, with different handling for retryable vs non-retryable
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            // Needs operator action; poll slowly until the environment changes
            self.max_delay
        }
    }
}
