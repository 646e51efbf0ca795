use std::path::PathBuf;

use ferroshape_core::{InstructorError, SchemaError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("cannot read schema {path}: {source}")]
    SchemaFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema {path} is not valid JSON: {source}")]
    SchemaJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Instructor(#[from] InstructorError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Stream(#[from] ferroshape_agent::StreamError),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Argument(_) | Self::SchemaFile { .. } | Self::SchemaJson { .. } | Self::Schema(_) => 2,
            Self::Instructor(InstructorError::RetriesExhausted { .. }) => 3,
            Self::Instructor(InstructorError::Transport(_)) => 7,
            Self::Instructor(_) => 2,
            Self::Serialization(_) => 4,
            Self::Stream(_) => 6,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferroshape_core::{FieldError, TransportError, ValidationErrors};

    #[test]
    fn exit_codes_separate_validation_from_transport_failures() {
        let exhausted = CliError::from(InstructorError::RetriesExhausted {
            attempts: 3,
            last_error: ValidationErrors::single(FieldError::parse("bad")),
        });
        let transport = CliError::from(InstructorError::from(TransportError::connect("refused")));
        let argument = CliError::Argument("option".to_string());

        assert_eq!(exhausted.exit_code(), 3);
        assert_eq!(transport.exit_code(), 7);
        assert_eq!(argument.exit_code(), 2);
    }
}
