use std::error::Error;
use std::fmt::{Display, Formatter};

pub type TdmsResult<T> = Result<T, TdmsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TdmsErrorCategory {
    Success,
    InputValidationError,
    IoSystemError,
    ComputationError,
    InternalError,
}

impl TdmsErrorCategory {
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::InputValidationError => 2,
            Self::IoSystemError => 3,
            Self::ComputationError => 4,
            Self::InternalError => 5,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::InputValidationError => "InputValidationError",
            Self::IoSystemError => "IoSystemError",
            Self::ComputationError => "ComputationError",
            Self::InternalError => "InternalError",
        }
    }

    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TdmsError {
    category: TdmsErrorCategory,
    label: &'static str,
    message: String,
}

impl TdmsError {
    pub fn new(
        category: TdmsErrorCategory,
        label: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            label,
            message: message.into(),
        }
    }

    pub fn input_validation(label: &'static str, message: impl Into<String>) -> Self {
        Self::new(TdmsErrorCategory::InputValidationError, label, message)
    }

    pub fn io_system(label: &'static str, message: impl Into<String>) -> Self {
        Self::new(TdmsErrorCategory::IoSystemError, label, message)
    }

    pub fn computation(label: &'static str, message: impl Into<String>) -> Self {
        Self::new(TdmsErrorCategory::ComputationError, label, message)
    }

    pub fn internal(label: &'static str, message: impl Into<String>) -> Self {
        Self::new(TdmsErrorCategory::InternalError, label, message)
    }

    pub const fn category(&self) -> TdmsErrorCategory {
        self.category
    }

    pub const fn label(&self) -> &'static str {
        self.label
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        let severity = if self.category.is_fatal() {
            "ERROR"
        } else {
            "INFO"
        };
        format!("{}: [{}] {}", severity, self.label, self.message)
    }

    pub fn fatal_exit_line(&self) -> Option<String> {
        self.category
            .is_fatal()
            .then(|| format!("FATAL EXIT CODE: {}", self.exit_code()))
    }
}

impl Display for TdmsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.category.as_str(),
            self.label,
            self.message
        )
    }
}

impl Error for TdmsError {}

#[cfg(test)]
mod tests {
    use super::{TdmsError, TdmsErrorCategory};

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (TdmsErrorCategory::Success, 0),
            (TdmsErrorCategory::InputValidationError, 2),
            (TdmsErrorCategory::IoSystemError, 3),
            (TdmsErrorCategory::ComputationError, 4),
            (TdmsErrorCategory::InternalError, 5),
        ];
        for (category, exit_code) in cases {
            assert_eq!(category.exit_code(), exit_code);
        }
    }

    #[test]
    fn fatal_error_renders_diagnostic_lines() {
        let error = TdmsError::input_validation("INPUT.INTERFACE", "I0 plane lies outside grid");

        assert_eq!(error.exit_code(), 2);
        assert_eq!(
            error.diagnostic_line(),
            "ERROR: [INPUT.INTERFACE] I0 plane lies outside grid"
        );
        assert_eq!(
            error.fatal_exit_line().as_deref(),
            Some("FATAL EXIT CODE: 2")
        );
    }
}
