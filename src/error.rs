use thiserror::Error;

/// Whether a failure is the module author's problem or a defect in the analyzer/input archive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FailureCategory {
    UserError,
    Defect,
}

/// Fatal analysis failure. Every variant aborts the run; there is no partial output.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub(crate) enum AnalysisError {
    #[error("malformed class file {class}: {detail}")]
    MalformedClass { class: String, detail: String },
    #[error("unsupported instruction in {class}.{method}: {detail}")]
    UnsupportedInstruction {
        class: String,
        method: String,
        detail: String,
    },
    #[error("unsupported external class {target} referenced from {class}.{method}")]
    UnresolvedClass {
        class: String,
        method: String,
        target: String,
    },
    #[error("unsupported platform API {target}#{target_method} called from {class}.{method}")]
    UnsupportedPlatformCall {
        class: String,
        method: String,
        target: String,
        target_method: String,
    },
    #[error("corrupt class hierarchy at {class}: {detail}")]
    CorruptHierarchy { class: String, detail: String },
    #[error("no declaration found for {class}#{method}, corrupt module suspected")]
    CorruptModule { class: String, method: String },
    #[error("mandatory entry point {class}#{method} not found")]
    MissingEntryPoint { class: String, method: String },
    #[error("entry class {class} is not part of the module")]
    MissingEntryClass { class: String },
    #[error("failed to rewrite {class}: {detail}")]
    RewriteFailure { class: String, detail: String },
}

impl AnalysisError {
    /// Stable machine-readable reason code.
    pub(crate) fn reason_code(&self) -> &'static str {
        match self {
            AnalysisError::MalformedClass { .. } => "malformed-class",
            AnalysisError::UnsupportedInstruction { .. } => "unsupported-instruction",
            AnalysisError::UnresolvedClass { .. } => "unresolved-class",
            AnalysisError::UnsupportedPlatformCall { .. } => "unsupported-platform-call",
            AnalysisError::CorruptHierarchy { .. } => "corrupt-hierarchy",
            AnalysisError::CorruptModule { .. } => "corrupt-module",
            AnalysisError::MissingEntryPoint { .. } => "missing-entry-point",
            AnalysisError::MissingEntryClass { .. } => "missing-entry-class",
            AnalysisError::RewriteFailure { .. } => "rewrite-failure",
        }
    }

    pub(crate) fn category(&self) -> FailureCategory {
        match self {
            AnalysisError::MalformedClass { .. }
            | AnalysisError::UnsupportedInstruction { .. }
            | AnalysisError::UnresolvedClass { .. }
            | AnalysisError::UnsupportedPlatformCall { .. } => FailureCategory::UserError,
            AnalysisError::CorruptHierarchy { .. }
            | AnalysisError::CorruptModule { .. }
            | AnalysisError::MissingEntryPoint { .. }
            | AnalysisError::MissingEntryClass { .. }
            | AnalysisError::RewriteFailure { .. } => FailureCategory::Defect,
        }
    }

    /// Class the failure is addressed at.
    pub(crate) fn class(&self) -> &str {
        match self {
            AnalysisError::MalformedClass { class, .. }
            | AnalysisError::UnsupportedInstruction { class, .. }
            | AnalysisError::UnresolvedClass { class, .. }
            | AnalysisError::UnsupportedPlatformCall { class, .. }
            | AnalysisError::CorruptHierarchy { class, .. }
            | AnalysisError::CorruptModule { class, .. }
            | AnalysisError::MissingEntryPoint { class, .. }
            | AnalysisError::MissingEntryClass { class }
            | AnalysisError::RewriteFailure { class, .. } => class,
        }
    }

    /// Method the failure is addressed at, when one is known.
    pub(crate) fn method(&self) -> Option<&str> {
        match self {
            AnalysisError::UnsupportedInstruction { method, .. }
            | AnalysisError::UnresolvedClass { method, .. }
            | AnalysisError::UnsupportedPlatformCall { method, .. }
            | AnalysisError::CorruptModule { method, .. }
            | AnalysisError::MissingEntryPoint { method, .. } => Some(method),
            AnalysisError::MalformedClass { .. }
            | AnalysisError::CorruptHierarchy { .. }
            | AnalysisError::MissingEntryClass { .. }
            | AnalysisError::RewriteFailure { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_call_is_a_user_error_naming_the_callee() {
        let error = AnalysisError::UnsupportedPlatformCall {
            class: "com/example/App".to_string(),
            method: "run()V".to_string(),
            target: "java/lang/String".to_string(),
            target_method: "intern()Ljava/lang/String;".to_string(),
        };

        assert_eq!(error.reason_code(), "unsupported-platform-call");
        assert_eq!(error.category(), FailureCategory::UserError);
        assert_eq!(error.class(), "com/example/App");
        assert_eq!(error.method(), Some("run()V"));
        assert!(error
            .to_string()
            .contains("java/lang/String#intern()Ljava/lang/String;"));
    }

    #[test]
    fn rewrite_failure_is_a_defect() {
        let error = AnalysisError::RewriteFailure {
            class: "A".to_string(),
            detail: "truncated".to_string(),
        };

        assert_eq!(error.category(), FailureCategory::Defect);
        assert_eq!(error.method(), None);
    }
}
