//! Error types and result definitions for session worker operations.
//!
//! Provides a classified error system with captured diagnostic metadata for the
//! task-scheduling and shutdown-coordination layer. [`RdalError`] is the uniform
//! failure currency of the crate: every failure reported through a result handle,
//! whatever its origin, is carried by this type.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for session worker operations using [`RdalError`] as the error type.
///
/// This type alias reduces boilerplate when working with fallible operations.
/// Most functions in this crate return this type.
pub type RdalResult<T> = Result<T, RdalError>;

/// Detailed payload stored for [`RdalError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for session worker operations.
///
/// [`RdalError`] carries an [`ErrorKind`] classification, a static description,
/// optional dynamic detail, an optional source error, and captured callsite and
/// backtrace information. The type is cheaply cloneable so a single failure can
/// be multicast to every observer of a cached result handle.
#[derive(Debug, Clone)]
pub struct RdalError {
    payload: ErrorPayload,
}

/// Specific categories of errors that can occur in the session worker layer.
///
/// This enum provides granular error classification to enable appropriate error
/// handling strategies. Callers match on the kind to distinguish, for example,
/// "the worker was shut down" from "the task genuinely failed".
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Task execution errors
    TaskPanic,
    WorkerPanic,
    RejectedSubmission,

    // Shutdown errors
    ShutdownTimeout,
    ShutdownInterrupted,

    // State & capability errors
    InvalidState,
    UnsupportedOperation,

    // Configuration errors
    ConfigError,
    DeserializationError,

    // Unknown / Uncategorized
    Unknown,
}

impl RdalError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> &Backtrace {
        self.payload.backtrace.as_ref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// The stored source is preserved across clones and exposed via [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    /// Creates an [`RdalError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        let location = Location::caller();
        let backtrace = Arc::new(Backtrace::capture());

        RdalError {
            payload: ErrorPayload {
                kind,
                description,
                detail,
                source,
                location,
                backtrace,
            },
        }
    }
}

impl fmt::Display for RdalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let location = self.payload.location;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            self.payload.kind,
            self.payload.description,
            location.file(),
            location.line(),
            location.column()
        )?;

        write_detail(self.payload.detail.as_deref(), f, 1)?;
        write_backtrace(self.payload.backtrace.as_ref(), f, 1)?;

        Ok(())
    }
}

impl error::Error for RdalError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

/// Writes the captured backtrace with indentation.
fn write_backtrace(
    backtrace: &Backtrace,
    f: &mut fmt::Formatter<'_>,
    indent: usize,
) -> fmt::Result {
    let indent_str = "  ".repeat(indent);

    let rendered_backtrace = format!("{backtrace}");
    if !rendered_backtrace.trim().is_empty() {
        write!(f, "\n{indent_str}Backtrace:")?;
        for line in rendered_backtrace.lines() {
            if line.trim().is_empty() {
                write!(f, "\n{indent_str}  ")?;
            } else {
                write!(f, "\n{indent_str}  {line}")?;
            }
        }
    }

    Ok(())
}

/// Writes the detail block with indentation.
fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    if let Some(detail) = detail {
        let indent_str = "  ".repeat(indent);
        if detail.trim().is_empty() {
            write!(f, "\n{indent_str}Detail: <empty>")?;
        } else {
            write!(f, "\n{indent_str}Detail:")?;
            for line in detail.lines() {
                if line.trim().is_empty() {
                    write!(f, "\n{indent_str}  ")?;
                } else {
                    write!(f, "\n{indent_str}  {line}")?;
                }
            }
        }
    }

    Ok(())
}

/// Creates an [`RdalError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for RdalError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> RdalError {
        RdalError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates an [`RdalError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for RdalError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> RdalError {
        RdalError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Converts [`serde_json::Error`] to [`RdalError`] with the appropriate error kind.
///
/// Maps I/O failures to [`ErrorKind::ConfigError`] and syntax or data mismatches to
/// [`ErrorKind::DeserializationError`] based on error classification.
impl From<serde_json::Error> for RdalError {
    #[track_caller]
    fn from(err: serde_json::Error) -> RdalError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => {
                (ErrorKind::ConfigError, "Configuration I/O failed")
            }
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        RdalError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}
