use crate::types::{Finding, Severity, ValidateInput, ValidationCategory};

pub trait Rule: Send + Sync {
    fn id(&self) -> &str;
    fn category(&self) -> ValidationCategory;
    fn eval(&self, input: &ValidateInput<'_>) -> Vec<Finding>;

    fn fail(&self, subject: impl Into<String>, message: impl Into<String>) -> Finding
    where
        Self: Sized,
    {
        self.finding(Severity::Fail, subject, message)
    }

    fn warn(&self, subject: impl Into<String>, message: impl Into<String>) -> Finding
    where
        Self: Sized,
    {
        self.finding(Severity::Warn, subject, message)
    }

    fn finding(&self, severity: Severity, subject: impl Into<String>, message: impl Into<String>) -> Finding
    where
        Self: Sized,
    {
        Finding {
            rule_id: self.id().to_string(),
            category: self.category(),
            severity,
            message: message.into(),
            subject: subject.into(),
        }
    }
}
