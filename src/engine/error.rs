//! Error types for serialization, registration, and background jobs.
//!
//! Most misuses of the core are *preconditions*: checked with debug
//! assertions and not represented as values (see the crate docs). The types
//! here cover the operations that can fail for a well-behaved caller:
//! loading a byte stream produced elsewhere, registering a function whose
//! name is already taken, and spawning a job worker the OS refuses. Each
//! error carries enough context to make failures actionable while remaining
//! small and cheap to pass around or convert into higher-level variants
//! like [`SerializeError`] or [`EcsError`].
//!
//! ## Goals
//! * **Specificity:** Each type models a single failure mode (truncated
//!   stream, unknown component id, duplicate function name, thread-spawn
//!   failure).
//! * **Ergonomics:** All errors implement [`std::error::Error`] and
//!   [`fmt::Display`], with `From<T>` conversions into aggregates.
//! * **Actionability:** Structured fields (offending ids and names, byte
//!   counts) make logs useful without reproducing the issue.

use std::fmt;

use crate::engine::types::ComponentTypeId;

/// Result alias for operations that fail with an [`EcsError`].
pub type EcsResult<T> = Result<T, EcsError>;

/// Result alias for serializer operations.
pub type SerializeResult<T> = Result<T, SerializeError>;

/// Returned when a function-registry contract is violated.
///
/// These conditions are also logged and debug-asserted at the call site
/// (they indicate programmer error); the `Err` keeps the outcome
/// detectable in release builds, where the assertions are stripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// A function id was registered a second time.
    DuplicateFunction {
        /// Name the function was registered under.
        name: &'static str,
    },

    /// An unregistration named a function id that is not registered.
    UnknownFunction {
        /// Name the unregistration asked for.
        name: &'static str,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateFunction { name } => {
                write!(f, "{name} function is already registered")
            }
            RegistryError::UnknownFunction { name } => {
                write!(f, "{name} function is already unregistered")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Returned when a background job cannot be started.
#[derive(Debug)]
pub enum JobError {
    /// The OS refused to spawn the job's worker thread.
    Spawn {
        /// System the job belongs to.
        system: String,

        /// Underlying spawn failure.
        source: std::io::Error,
    },
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::Spawn { system, source } => {
                write!(f, "failed to spawn the job worker for {system}: {source}")
            }
        }
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JobError::Spawn { source, .. } => Some(source),
        }
    }
}

/// Returned when a load stream ends before a record's payload does.
///
/// ### Fields
/// * `needed` — Bytes the current record still required.
/// * `remaining` — Bytes actually left in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncatedStreamError {
    /// Bytes the current record still required.
    pub needed: usize,

    /// Bytes left in the stream.
    pub remaining: usize,
}

impl fmt::Display for TruncatedStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stream truncated ({} bytes needed; {} remaining)",
            self.needed, self.remaining
        )
    }
}

impl std::error::Error for TruncatedStreamError {}

/// Returned when the save and load codec tables disagree.
///
/// Every component registered for serialization must have both a save and
/// a load function; a one-sided registration would silently drop or
/// misparse records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnmatchedCodecsError {
    /// Number of registered save functions.
    pub savers: usize,

    /// Number of registered load functions.
    pub loaders: usize,
}

impl fmt::Display for UnmatchedCodecsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "save/load codecs are not registered in matched pairs ({} savers, {} loaders)",
            self.savers, self.loaders
        )
    }
}

impl std::error::Error for UnmatchedCodecsError {}

/// Aggregate error for serializer save/load operations.
///
/// `Display` messages are single-line and suitable for logs; `Debug`
/// retains full structure for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializeError {
    /// The stream ended in the middle of a record.
    Truncated(TruncatedStreamError),

    /// A record id matched no registered load function.
    UnknownComponent {
        /// The unrecognised record id.
        id: ComponentTypeId,
    },

    /// A component record appeared before any entity sentinel.
    ComponentBeforeEntity {
        /// The record id that arrived too early.
        id: ComponentTypeId,
    },

    /// A payload could not be decoded into the component type.
    MalformedPayload {
        /// Component the payload belonged to.
        id: ComponentTypeId,
    },

    /// The codec tables were not registered in matched pairs.
    UnmatchedCodecs(UnmatchedCodecsError),
}

impl fmt::Display for SerializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializeError::Truncated(e) => write!(f, "{e}"),
            SerializeError::UnknownComponent { id } => {
                write!(f, "no load function registered for component id {id:#010x}")
            }
            SerializeError::ComponentBeforeEntity { id } => {
                write!(
                    f,
                    "component record {id:#010x} appeared before any entity sentinel"
                )
            }
            SerializeError::MalformedPayload { id } => {
                write!(f, "malformed payload for component id {id:#010x}")
            }
            SerializeError::UnmatchedCodecs(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SerializeError {}

impl From<TruncatedStreamError> for SerializeError {
    fn from(e: TruncatedStreamError) -> Self {
        SerializeError::Truncated(e)
    }
}

impl From<UnmatchedCodecsError> for SerializeError {
    fn from(e: UnmatchedCodecsError) -> Self {
        SerializeError::UnmatchedCodecs(e)
    }
}

/// Aggregate error for every fallible core operation.
///
/// `From<T>` conversions from the per-subsystem errors let callers write
/// `?` against a single [`EcsResult`] type.
#[derive(Debug)]
pub enum EcsError {
    /// A function-registry contract was violated.
    Registry(RegistryError),

    /// A background job could not be started.
    Job(JobError),

    /// A serializer operation failed.
    Serialize(SerializeError),
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::Registry(e) => write!(f, "{e}"),
            EcsError::Job(e) => write!(f, "{e}"),
            EcsError::Serialize(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EcsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EcsError::Registry(e) => Some(e),
            EcsError::Job(e) => Some(e),
            EcsError::Serialize(e) => Some(e),
        }
    }
}

impl From<RegistryError> for EcsError {
    fn from(e: RegistryError) -> Self {
        EcsError::Registry(e)
    }
}

impl From<JobError> for EcsError {
    fn from(e: JobError) -> Self {
        EcsError::Job(e)
    }
}

impl From<SerializeError> for EcsError {
    fn from(e: SerializeError) -> Self {
        EcsError::Serialize(e)
    }
}
