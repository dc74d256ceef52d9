//! Centralized error types and handling

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network operation error: {0}")]
    Network(#[from] NetworkError),

    #[error("Address pool error: {0}")]
    Ipam(#[from] IpamError),

    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invocation error: {0}")]
    Cni(#[from] CniError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{step} failed: {source}")]
    Step {
        step: ProvisionStep,
        #[source]
        source: Box<AppError>,
    },
}

/// Network namespace and link errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to resolve network namespace {path}: {reason}")]
    NamespaceResolution { path: PathBuf, reason: String },

    #[error("Failed to {phase} network namespace: {reason}")]
    NamespaceSwitch { phase: SwitchPhase, reason: String },

    #[error("Link operation '{operation}' failed: {reason}")]
    LinkOperation { operation: String, reason: String },

    #[error("Namespace worker thread exited without reporting a result")]
    WorkerLost,

    #[error("Link not found: {name}")]
    LinkNotFound { name: String },

    #[error("Invalid interface name '{name}': {reason}")]
    InvalidInterfaceName { name: String, reason: String },
}

impl NetworkError {
    pub(crate) fn link(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        NetworkError::LinkOperation {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Which side of a namespace switch failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPhase {
    Capture,
    Enter,
    Restore,
}

impl fmt::Display for SwitchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchPhase::Capture => f.write_str("capture"),
            SwitchPhase::Enter => f.write_str("enter"),
            SwitchPhase::Restore => f.write_str("restore"),
        }
    }
}

/// Address pool errors
#[derive(Debug, Error)]
pub enum IpamError {
    #[error("Address pool {cidr} is exhausted")]
    Exhausted { cidr: String },

    #[error("Pool file {path} I/O failure: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pool file {path} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Failed to lock pool file {path}: {reason}")]
    Lock { path: PathBuf, reason: String },

    #[error("Pool file {path} already exists")]
    AlreadyInitialized { path: PathBuf },
}

/// Route calculation errors
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Invalid route configuration: {0}")]
    InvalidRoute(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration format: {0}")]
    InvalidFormat(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Errors raised while reading the invocation envelope
#[derive(Debug, Error)]
pub enum CniError {
    #[error("Missing {0} argument")]
    MissingVariable(&'static str),

    #[error("Unknown CNI_COMMAND '{0}', expected one of ADD, DEL, VERSION")]
    UnknownCommand(String),

    #[error("Failed to decode network configuration: {0}")]
    Decode(String),
}

/// Pipeline step a provisioning failure originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    EnsureBridge,
    ResolveNamespace,
    CreateVeth,
    AttachHostInterface,
    MoveToNamespace,
    ConfigureContainerInterface,
    ReleaseContainerInterface,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            ProvisionStep::EnsureBridge => "ensure bridge",
            ProvisionStep::ResolveNamespace => "resolve network namespace",
            ProvisionStep::CreateVeth => "create veth pair",
            ProvisionStep::AttachHostInterface => "attach host interface to bridge",
            ProvisionStep::MoveToNamespace => "move interface to network namespace",
            ProvisionStep::ConfigureContainerInterface => "configure container interface",
            ProvisionStep::ReleaseContainerInterface => "release container interface",
        };
        f.write_str(step)
    }
}

/// Attach the pipeline step to a failing result
pub trait StepContext<T> {
    fn step(self, step: ProvisionStep) -> Result<T, AppError>;
}

impl<T, E> StepContext<T> for Result<T, E>
where
    E: Into<AppError>,
{
    fn step(self, step: ProvisionStep) -> Result<T, AppError> {
        self.map_err(|e| AppError::Step {
            step,
            source: Box::new(e.into()),
        })
    }
}

impl AppError {
    /// Numeric classification reported in the error payload
    pub fn code(&self) -> u32 {
        match self {
            AppError::Step { source, .. } => source.code(),
            AppError::Cni(CniError::Decode(_)) => 6,
            AppError::Cni(_) => 4,
            AppError::Config(_) => 7,
            AppError::Ipam(IpamError::Exhausted { .. }) => 11,
            AppError::Ipam(_) => 5,
            AppError::Network(NetworkError::NamespaceResolution { .. }) => 100,
            AppError::Network(NetworkError::NamespaceSwitch { .. })
            | AppError::Network(NetworkError::WorkerLost) => 101,
            AppError::Network(_) => 102,
            AppError::Route(_) | AppError::Io(_) | AppError::Json(_) => 999,
        }
    }

    /// The failing step, if the error came out of a provisioning pipeline
    pub fn failed_step(&self) -> Option<ProvisionStep> {
        match self {
            AppError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// The underlying cause with any step wrapping removed
    pub fn root(&self) -> &AppError {
        match self {
            AppError::Step { source, .. } => source.root(),
            other => other,
        }
    }
}
