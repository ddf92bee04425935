use std::fmt;

#[derive(Debug)]
pub enum NovaError {
    InvalidConfig,
    ConfigError(String),
    XmlError(String),
    DuplicateSerial(String),
    UnsortedDowntimeSteps { index: usize },
    DiskFragmentNotFound(String),
    StoreError(String),
    IoError(std::io::Error),
    SerdeError(String),
}

impl fmt::Display for NovaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NovaError::InvalidConfig => write!(f, "Invalid configuration"),
            NovaError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            NovaError::XmlError(msg) => write!(f, "Domain XML error: {}", msg),
            NovaError::DuplicateSerial(serial) => {
                write!(f, "Block device serial '{}' is mapped more than once", serial)
            }
            NovaError::UnsortedDowntimeSteps { index } => write!(
                f,
                "Downtime step {} has a threshold lower than the step before it",
                index
            ),
            NovaError::DiskFragmentNotFound(volume) => {
                write!(f, "No destination disk definition for volume '{}'", volume)
            }
            NovaError::StoreError(msg) => write!(f, "Failed to save record: {}", msg),
            NovaError::IoError(err) => write!(f, "IO error: {}", err),
            NovaError::SerdeError(err) => write!(f, "Configuration parse error: {}", err),
        }
    }
}

impl std::error::Error for NovaError {}

impl From<std::io::Error> for NovaError {
    fn from(err: std::io::Error) -> Self {
        NovaError::IoError(err)
    }
}

impl From<toml::de::Error> for NovaError {
    fn from(err: toml::de::Error) -> Self {
        NovaError::SerdeError(err.to_string())
    }
}

impl From<serde_json::Error> for NovaError {
    fn from(err: serde_json::Error) -> Self {
        NovaError::SerdeError(err.to_string())
    }
}

impl From<roxmltree::Error> for NovaError {
    fn from(err: roxmltree::Error) -> Self {
        NovaError::XmlError(err.to_string())
    }
}

/// Failure reported by a hypervisor-side capability (guest query,
/// downtime control, destination disk lookup).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HypervisorError {
    /// The domain no longer exists on this host.
    #[error("Domain not found: {0}")]
    NotFound(String),

    #[error("Hypervisor error: {0}")]
    Other(String),
}

impl HypervisorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HypervisorError::NotFound(_))
    }
}

impl From<NovaError> for HypervisorError {
    fn from(err: NovaError) -> Self {
        HypervisorError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_classified() {
        assert!(HypervisorError::NotFound("instance-0001".into()).is_not_found());
        assert!(!HypervisorError::Other("connection reset".into()).is_not_found());
    }

    #[test]
    fn display_names_the_serial() {
        let err = NovaError::DuplicateSerial("vol-1".into());
        assert!(err.to_string().contains("'vol-1'"));
    }
}
