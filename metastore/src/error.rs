//! Error types and result definitions for metadata store operations.
//!
//! [`MetadataError`] carries an [`ErrorKind`] from a small taxonomy, a static description,
//! optional dynamic detail, an optional source error and the callsite that created it.
//! When a cleanup path fails after the original failure, both errors are aggregated into
//! one [`MetadataError`] so that neither is lost.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use metastore_config::shared::ValidationError;

/// Result type for metadata store operations.
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Detailed payload stored for single [`MetadataError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for metadata store operations.
#[derive(Debug, Clone)]
pub struct MetadataError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Errors collected on one exit path, in the order they happened.
    Many {
        errors: Vec<MetadataError>,
        location: &'static Location<'static>,
    },
}

/// Categories of failures surfaced by the connection lifecycle.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Invalid or missing connection settings. Fatal and never retried.
    ConfigurationError,
    /// The session could not be established or released.
    ConnectionError,
    /// A begin, statement, commit or rollback failed.
    TransactionError,
    /// An operation was invoked in the wrong lifecycle state.
    InvalidState,
}

impl MetadataError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// Aggregated errors report the kind of the first contained error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::InvalidState),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    /// Returns the static description of this error, or of the first aggregated error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.description())
                .unwrap_or("no errors aggregated"),
        }
    }

    /// Returns the dynamic detail if one was attached.
    ///
    /// Aggregated errors return the first detail found.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the backtrace captured when a single error was created.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the callsite that created this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches the originating error, exposed through [`error::Error::source`].
    ///
    /// Has no effect on aggregated errors, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        MetadataError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for MetadataError {
    fn eq(&self, other: &MetadataError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail:")?;
                    for line in detail.lines() {
                        write!(f, "\n    {line}")?;
                    }
                }

                let rendered_backtrace = payload.backtrace.to_string();
                if !rendered_backtrace.trim().is_empty()
                    && payload.backtrace.status() == std::backtrace::BacktraceStatus::Captured
                {
                    write!(f, "\n  Backtrace:")?;
                    for line in rendered_backtrace.lines() {
                        write!(f, "\n    {line}")?;
                    }
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    if let Some(first_line) = lines.next() {
                        write!(f, "\n  {}. {}", index + 1, first_line)?;
                    }
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for MetadataError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Creates a [`MetadataError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for MetadataError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> MetadataError {
        MetadataError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`MetadataError`] from an error kind, static description and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for MetadataError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> MetadataError {
        MetadataError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned as is.
impl<E> From<Vec<E>> for MetadataError
where
    E: Into<MetadataError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> MetadataError {
        let location = Location::caller();
        let mut errors: Vec<MetadataError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        MetadataError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts a [`ValidationError`] into [`ErrorKind::ConfigurationError`].
impl From<ValidationError> for MetadataError {
    #[track_caller]
    fn from(err: ValidationError) -> MetadataError {
        let detail = err.to_string();
        MetadataError::from_components(
            ErrorKind::ConfigurationError,
            Cow::Borrowed("Invalid metadata source configuration"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts a [`sqlx::Error`] using a coarse classification.
///
/// Configuration problems map to [`ErrorKind::ConfigurationError`], transport and pool
/// failures to [`ErrorKind::ConnectionError`], and everything the server answered to
/// [`ErrorKind::TransactionError`]. Call sites that know which lifecycle step failed
/// should pick the kind themselves.
impl From<sqlx::Error> for MetadataError {
    #[track_caller]
    fn from(err: sqlx::Error) -> MetadataError {
        let (kind, description) = match &err {
            sqlx::Error::Configuration(_) => (
                ErrorKind::ConfigurationError,
                "MySQL connection options are invalid",
            ),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => {
                (ErrorKind::ConnectionError, "MySQL connection failed")
            }
            _ => (ErrorKind::TransactionError, "MySQL statement failed"),
        };

        let detail = err.to_string();
        MetadataError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
