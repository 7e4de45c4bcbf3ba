//! Error taxonomy and diagnostic sink
//!
//! The core never swallows an error: every call site that can fail reports
//! `(kind, file, line, iosystem, file_handle)` into the diagnostic sink (a
//! `log` target) before returning the error to its caller. The top-level
//! write/read calls simply propagate what they receive.

use std::fmt;

/// Identifies the `IOSystem` a failing call belongs to, for the diagnostic sink.
pub type IosystemId = i32;

/// Identifies the file handle a failing call belongs to, for the diagnostic sink.
pub type FileId = i32;

/// The error taxonomy surfaced by the core (see spec §7).
#[derive(Debug, thiserror::Error)]
pub enum PioError {
    /// Unknown file, variable, or decomposition id.
    #[error("unknown id: {0}")]
    BadId(String),

    /// Argument out of range or structurally inconsistent.
    #[error("invalid argument: {0}")]
    Inval(String),

    /// Write attempted on a file not opened for write.
    #[error("permission denied: {0}")]
    Perm(String),

    /// Buffer pool or system allocator failed.
    #[error("out of memory: {0}")]
    Oom(String),

    /// Unknown backend tag.
    #[error("unknown backend type: {0}")]
    BadIoType(String),

    /// Fill defaulting attempted for an unknown element type.
    #[error("unknown element type: {0}")]
    BadElementType(String),

    /// Underlying collective failure; carries the decoded error string.
    #[error("collective communication failure: {0}")]
    MpiFail(String),

    /// Pass-through from the file-format backend.
    #[error("backend error: {0}")]
    Backend(String),
}

impl PioError {
    /// Short tag matching the spec's error-code names, for callers that want
    /// to match on the kind without pattern-matching the full enum.
    pub fn kind(&self) -> &'static str {
        match self {
            PioError::BadId(_) => "EBADID",
            PioError::Inval(_) => "EINVAL",
            PioError::Perm(_) => "EPERM",
            PioError::Oom(_) => "ENOMEM",
            PioError::BadIoType(_) => "EBADIOTYPE",
            PioError::BadElementType(_) => "EBADTYPE",
            PioError::MpiFail(_) => "EMPIFAIL",
            PioError::Backend(_) => "EBACKEND",
        }
    }
}

impl From<anyhow::Error> for PioError {
    fn from(err: anyhow::Error) -> Self {
        PioError::Backend(format!("{err:#}"))
    }
}

/// A reference to the "(iosystem, file)" pair the diagnostic sink attaches to
/// every reported error. Either half may be absent (e.g. a pool error has no
/// file context).
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagContext {
    pub iosystem: Option<IosystemId>,
    pub file: Option<FileId>,
}

impl fmt::Display for DiagContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iosystem={} file={}",
            self.iosystem.map_or("-".to_string(), |v| v.to_string()),
            self.file.map_or("-".to_string(), |v| v.to_string())
        )
    }
}

/// Reports `err` to the diagnostic sink and returns it unchanged, for use at
/// every fallible call site: `return Err(report(err, ctx, file!(), line!()));`
///
/// Gated by `PioConfig::enable_logging` at the call site, not here, because
/// the sink has no access to a live config; callers pass `enabled` explicitly.
pub fn report(err: PioError, ctx: DiagContext, enabled: bool, src_file: &str, src_line: u32) -> PioError {
    if enabled {
        log::error!(
            target: "pario::diag",
            "{} at {}:{} ({ctx})",
            err,
            src_file,
            src_line,
        );
    }
    err
}

/// Convenience macro: reports `$err` with the call site's file/line and the
/// given `DiagContext`, then returns it as an `Err`.
#[macro_export]
macro_rules! bail_reported {
    ($err:expr, $ctx:expr, $enabled:expr) => {
        return Err($crate::error::report($err, $ctx, $enabled, file!(), line!()))
    };
}
