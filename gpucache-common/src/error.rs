// Copyright 2026 gpucache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::{Debug, Display};

/// All kinds of [`Error`] raised by gpucache.
///
/// Cache operations themselves never fail, so the only fallible surface is configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Config error.
    Config,
}

impl ErrorKind {
    /// Convert self into static str.
    pub fn into_static(self) -> &'static str {
        self.into()
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.into_static())
    }
}

impl From<ErrorKind> for &'static str {
    fn from(v: ErrorKind) -> &'static str {
        match v {
            ErrorKind::Config => "Config error",
        }
    }
}

/// The error struct returned by fallible gpucache functions.
///
/// `Display` prints a single line:
///
/// ```shell
/// Config error, context: { field: soft_limit_ratio, given: 1.5 } => invalid configuration
/// ```
///
/// `Debug` prints kind, message and context on separate lines.
/// The alternate `Debug` (`{:#?}`) prints the conventional struct representation.
#[derive(Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    context: Vec<(&'static str, String)>,
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            return f
                .debug_struct("Error")
                .field("kind", &self.kind)
                .field("message", &self.message)
                .field("context", &self.context)
                .finish();
        }

        write!(f, "{}", self.kind)?;
        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }
        writeln!(f)?;

        if !self.context.is_empty() {
            writeln!(f)?;
            writeln!(f, "Context:")?;
            for (k, v) in self.context.iter() {
                writeln!(f, "  {k}: {v}")?;
            }
        }

        Ok(())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;

        if !self.context.is_empty() {
            write!(f, ", context: {{ ")?;
            let mut iter = self.context.iter().peekable();
            while let Some((k, v)) = iter.next() {
                write!(f, "{k}: {v}")?;
                if iter.peek().is_some() {
                    write!(f, ", ")?;
                }
            }
            write!(f, " }}")?;
        }

        if !self.message.is_empty() {
            write!(f, " => {}", self.message)?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Create a new error.
    ///
    /// ```rust
    /// # use gpucache_common::error::{Error, ErrorKind};
    /// let err = Error::new(ErrorKind::Config, "invalid soft limit ratio").with_context("given", 1.5);
    /// assert_eq!(err.kind(), ErrorKind::Config);
    /// ```
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::new(),
        }
    }

    /// Add more context in error.
    pub fn with_context(mut self, key: &'static str, value: impl ToString) -> Self {
        self.context.push((key, value.to_string()));
        self
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the value recorded under `key`, if any.
    pub fn context(&self, key: &str) -> Option<&str> {
        self.context.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    /// Helper for creating an [`ErrorKind::Config`] error for a field outside its valid range.
    pub fn invalid_config(field: &'static str, expected: impl ToString, given: impl ToString) -> Self {
        Error::new(ErrorKind::Config, "invalid configuration")
            .with_context("field", field)
            .with_context("expected", expected)
            .with_context("given", given)
    }
}

/// Result type for gpucache.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<Error>();
    }

    #[test]
    fn test_error_display() {
        let err = Error::invalid_config("soft_limit_ratio", "(0.0, 1.0]", 1.5);
        assert_eq!(
            "Config error, context: { field: soft_limit_ratio, expected: (0.0, 1.0], given: 1.5 } => invalid configuration",
            err.to_string()
        );
    }

    #[test]
    fn test_error_context_lookup() {
        let err = Error::invalid_config("pid_memory_limit", "> 0", 0);
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.message(), "invalid configuration");
        assert_eq!(err.context("field"), Some("pid_memory_limit"));
        assert_eq!(err.context("given"), Some("0"));
        assert_eq!(err.context("source"), None);
    }

    #[test]
    fn test_error_debug() {
        let err = Error::invalid_config("soft_limit_ratio", "(0.0, 1.0]", 0);
        let text = format!("{err:?}");
        assert!(text.starts_with("Config error => invalid configuration\n"), "{text}");
        assert!(text.contains("  field: soft_limit_ratio\n"), "{text}");
    }
}
