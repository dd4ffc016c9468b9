use thiserror::Error;

use crate::{
    application::render::CoordinatorClosed, config::LoadError, infra::error::InfraError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("render failed: {0}")]
    Render(String),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorClosed),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit code for the binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) | AppError::Validation(_) => 2,
            AppError::Render(_) => 3,
            AppError::Infra(_) | AppError::Coordinator(_) | AppError::Unexpected(_) => 1,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::Infra(InfraError::Io(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_errors_keep_their_message() {
        let err = AppError::render("syntax error: front matter block is not closed");
        assert_eq!(
            err.to_string(),
            "render failed: syntax error: front matter block is not closed"
        );
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn io_errors_are_infra_errors() {
        let err = AppError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err, AppError::Infra(InfraError::Io(_))));
        assert_eq!(err.exit_code(), 1);
    }
}
