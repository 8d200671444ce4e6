// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error handling for partframe operations
//!
//! Every configuration, schema-inference and unimplemented-path error is
//! raised while a graph is being constructed. Failures inside a task surface
//! later as [`FrameError::Execution`] from whichever executor evaluated it.

use std::fmt;

/// Error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    KeyError = 2,
    TypeError = 3,
    Invalid = 4,
    IoError = 5,
    IndexError = 7,
    NotImplemented = 10,
    SerializationError = 11,
    ValueError = 14,
    SchemaInference = 20,
    ExecutionError = 42,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Code::KeyError => write!(f, "Key error"),
            Code::TypeError => write!(f, "Type error"),
            Code::Invalid => write!(f, "Invalid"),
            Code::IoError => write!(f, "IO error"),
            Code::IndexError => write!(f, "Index error"),
            Code::NotImplemented => write!(f, "Not implemented"),
            Code::SerializationError => write!(f, "Serialization error"),
            Code::ValueError => write!(f, "Value error"),
            Code::SchemaInference => write!(f, "Schema inference error"),
            Code::ExecutionError => write!(f, "Execution error"),
        }
    }
}

/// Main error type for partframe operations
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Query parse error: {0}")]
    Sql(#[from] sqlparser::parser::ParserError),

    #[error("Invalid operation: {0}")]
    Invalid(String),

    #[error("Metadata inference failed in `{function}`: {message}")]
    SchemaInference { function: String, message: String },

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Key not found: {0}")]
    KeyError(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Task {key} failed: {message}")]
    Execution { key: String, message: String },

    #[error("Generic error with code {code}: {message}")]
    Generic { code: Code, message: String },
}

impl FrameError {
    /// Create a new error with a specific code and message
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            Code::Invalid => FrameError::Invalid(message),
            Code::NotImplemented => FrameError::NotImplemented(message),
            Code::KeyError => FrameError::KeyError(message),
            Code::TypeError => FrameError::TypeError(message),
            _ => FrameError::Generic { code, message },
        }
    }

    /// Wrap a failure raised while dry-running `function` on metadata
    pub fn schema_inference(function: impl Into<String>, source: FrameError) -> Self {
        FrameError::SchemaInference {
            function: function.into(),
            message: source.to_string(),
        }
    }

    /// Get the error code
    pub fn code(&self) -> Code {
        match self {
            FrameError::Arrow(_) => Code::Invalid,
            FrameError::Io(_) => Code::IoError,
            FrameError::Json(_) => Code::SerializationError,
            FrameError::Sql(_) => Code::Invalid,
            FrameError::Invalid(_) => Code::Invalid,
            FrameError::SchemaInference { .. } => Code::SchemaInference,
            FrameError::NotImplemented(_) => Code::NotImplemented,
            FrameError::KeyError(_) => Code::KeyError,
            FrameError::TypeError(_) => Code::TypeError,
            FrameError::Execution { .. } => Code::ExecutionError,
            FrameError::Generic { code, .. } => *code,
        }
    }
}

/// Type alias for Results using FrameError
pub type FrameResult<T> = Result<T, FrameError>;
