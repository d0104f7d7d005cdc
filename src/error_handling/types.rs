use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    UnknownKey(String),
    InvalidValue(String, String),
    NoConfigDirectory,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::UnknownKey(k) => write!(f, "Unknown setting: {}", k),
            ConfigError::InvalidValue(k, e) => write!(f, "Invalid value for {}: {}", k, e),
            ConfigError::NoConfigDirectory => {
                write!(f, "Could not determine a configuration directory")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug, Clone)]
pub enum EngineError {
    Unreachable(String),
    ImageNotFound(String),
    ContainerNotFound(String),
    Api(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Unreachable(e) => write!(f, "Could not communicate with docker: {}", e),
            EngineError::ImageNotFound(i) => write!(f, "Image not found: {}", i),
            EngineError::ContainerNotFound(c) => write!(f, "Container not found: {}", c),
            EngineError::Api(e) => write!(f, "Docker API error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

#[derive(Debug)]
pub enum RegistryError {
    Http(String),
    Decode(String),
    TagNotFound(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Http(e) => write!(f, "Registry request failed: {}", e),
            RegistryError::Decode(e) => write!(f, "Registry response malformed: {}", e),
            RegistryError::TagNotFound(t) => write!(f, "Tag was not found: \"{}\"", t),
        }
    }
}

impl std::error::Error for RegistryError {}

/// A single violated constraint on user input to a start request.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MountMissing(PathBuf),
    TokenEmpty,
    TokenTooShort(usize),
    PortNotInteger(String),
    PortOutOfRange(i64),
    PortPrivileged(u16),
    PortClash(u16),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MountMissing(p) => {
                write!(f, "Data location {} does not exist", p.display())
            }
            ValidationError::TokenEmpty => write!(f, "Token must not be empty"),
            ValidationError::TokenTooShort(min) => {
                write!(f, "Token must be at least {} characters long", min)
            }
            ValidationError::PortNotInteger(s) => write!(f, "Port \"{}\" is not an integer", s),
            ValidationError::PortOutOfRange(p) => {
                write!(f, "Port {} is outside the range 1-65535", p)
            }
            ValidationError::PortPrivileged(p) => write!(f, "Port {} must be above 1024", p),
            ValidationError::PortClash(p) => {
                write!(f, "Port {} is already used as the auxiliary port", p)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Heuristic classification of an engine start failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    FileShare,
    PortInUse,
    ImageMissing,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::FileShare => "file-share",
            FailureKind::PortInUse => "port-in-use",
            FailureKind::ImageMissing => "image-missing",
            FailureKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StartFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl fmt::Display for StartFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Container start failed ({}): {}", self.kind, self.detail)
    }
}

impl std::error::Error for StartFailure {}

#[derive(Debug)]
pub enum PullError {
    Engine(EngineError),
}

impl fmt::Display for PullError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullError::Engine(e) => write!(f, "Pull failed: {}", e),
        }
    }
}

impl std::error::Error for PullError {}

impl From<EngineError> for PullError {
    fn from(err: EngineError) -> Self {
        PullError::Engine(err)
    }
}

#[derive(Debug)]
pub enum ControllerError {
    EngineUnavailable,
    InvalidInput(Vec<ValidationError>),
    NoLocalImage,
    NoRegistryTags,
    UpdateInProgress,
    PullCancelled,
    StartFailed(StartFailure),
    Engine(EngineError),
    Pull(PullError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::EngineUnavailable => {
                write!(f, "Docker is not available, start docker and try again")
            }
            ControllerError::InvalidInput(errors) => {
                let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                write!(f, "Invalid input: {}", msgs.join("; "))
            }
            ControllerError::NoLocalImage => write!(f, "No local image tag available"),
            ControllerError::NoRegistryTags => {
                write!(f, "No tags could be retrieved from the registry")
            }
            ControllerError::UpdateInProgress => write!(f, "An image download is already running"),
            ControllerError::PullCancelled => write!(f, "Image download was cancelled"),
            ControllerError::StartFailed(e) => write!(f, "{}", e),
            ControllerError::Engine(e) => write!(f, "Engine error: {}", e),
            ControllerError::Pull(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<EngineError> for ControllerError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Unreachable(_) => ControllerError::EngineUnavailable,
            other => ControllerError::Engine(other),
        }
    }
}

impl From<PullError> for ControllerError {
    fn from(err: PullError) -> Self {
        ControllerError::Pull(err)
    }
}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}
