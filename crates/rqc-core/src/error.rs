use thiserror::Error;

/// Admissibility failure carrying every unmet prerequisite, so the caller
/// can show the whole remediation list at once.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct WorkflowValidationError {
    pub message: String,
    pub details: Vec<String>,
}

impl WorkflowValidationError {
    pub fn new(message: impl Into<String>, details: Vec<String>) -> Self {
        Self {
            message: message.into(),
            details,
        }
    }
}

#[derive(Debug, Error)]
pub enum InspectionError {
    /// Malformed payload or unknown reference; nothing was persisted.
    #[error("invalid input: {0}")]
    Input(String),
    #[error(transparent)]
    Workflow(#[from] WorkflowValidationError),
    #[error("side conflict: {0}")]
    SideConflict(String),
    #[error("template integrity: {0}")]
    TemplateIntegrity(String),
    #[error("storage: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl InspectionError {
    pub fn input(msg: impl Into<String>) -> Self {
        InspectionError::Input(msg.into())
    }

    /// Detail lines for display; empty for errors that carry none.
    pub fn details(&self) -> &[String] {
        match self {
            InspectionError::Workflow(e) => &e.details,
            _ => &[],
        }
    }
}

pub type InspectionResult<T> = std::result::Result<T, InspectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_error_displays_message_and_keeps_details() {
        let err: InspectionError =
            WorkflowValidationError::new("prerequisites missing", vec!["Formwork".into(), "Binding".into()]).into();
        assert_eq!(err.to_string(), "prerequisites missing");
        assert_eq!(err.details(), &["Formwork".to_string(), "Binding".to_string()]);
    }

    #[test]
    fn storage_errors_wrap_anyhow() {
        let err: InspectionError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, InspectionError::Storage(_)));
        assert!(err.details().is_empty());
    }
}
