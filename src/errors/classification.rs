use super::types::SandflowError;

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
}

impl SandflowError {
    /// Classify this error to determine its type and whether a step attempt
    /// that produced it may be retried.
    pub fn classify(&self) -> ErrorClassification {
        match self {
            // Retryable errors
            SandflowError::StepExecution(_) => ErrorClassification {
                error_type: "StepExecutionError",
                retryable: true,
            },
            SandflowError::StepTimeout { .. } => ErrorClassification {
                error_type: "StepTimeoutError",
                retryable: true,
            },
            SandflowError::CommandTimeout { .. } => ErrorClassification {
                error_type: "CommandTimeoutError",
                retryable: true,
            },
            SandflowError::Io(_) => ErrorClassification {
                error_type: "IoError",
                retryable: true,
            },
            SandflowError::Git(_) => ErrorClassification {
                error_type: "GitError",
                retryable: true,
            },

            // Non-retryable errors
            SandflowError::SandboxSetup(_) => ErrorClassification {
                error_type: "SandboxSetupError",
                retryable: false,
            },
            SandflowError::SandboxNotInitialized => ErrorClassification {
                error_type: "SandboxNotInitialized",
                retryable: false,
            },
            SandflowError::FileNotFound(_) => ErrorClassification {
                error_type: "FileNotFound",
                retryable: false,
            },
            SandflowError::InvalidPath(_) => ErrorClassification {
                error_type: "InvalidPathError",
                retryable: false,
            },
            SandflowError::Config(_) => ErrorClassification {
                error_type: "ConfigError",
                retryable: false,
            },
            SandflowError::Registry(_) => ErrorClassification {
                error_type: "RegistryError",
                retryable: false,
            },
            SandflowError::Json(_) => ErrorClassification {
                error_type: "JsonError",
                retryable: false,
            },
            SandflowError::Yaml(_) => ErrorClassification {
                error_type: "YamlError",
                retryable: false,
            },
            SandflowError::Internal(_) => ErrorClassification {
                error_type: "InternalError",
                retryable: false,
            },
        }
    }
}
