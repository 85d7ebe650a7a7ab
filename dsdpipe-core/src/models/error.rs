use thiserror::Error;

/// Errors surfaced by the pipeline and its plugins.
///
/// Every variant has a fixed negative code (see [`PipelineError::code`]) so
/// front ends that only carry integers can still tell kinds apart.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error("pipeline not configured")]
    NotConfigured,

    #[error("pipeline already running")]
    AlreadyRunning,

    #[error("failed to open source: {0}")]
    SourceOpen(String),

    #[error("failed to open sink: {0}")]
    SinkOpen(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("DST decode error: {0}")]
    DstDecode(String),

    #[error("PCM conversion error: {0}")]
    PcmConvert(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("no source configured")]
    NoSource,

    #[error("no sinks configured")]
    NoSinks,

    #[error("track not found: {0}")]
    TrackNotFound(u32),

    #[error("invalid track specification: {0}")]
    InvalidTrackSpec(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("codec not available: {0}")]
    CodecUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Fixed message table, indexed by `-code`.
const ERROR_STRINGS: [&str; 19] = [
    "no error",
    "invalid argument",
    "out of memory",
    "pipeline not configured",
    "pipeline already running",
    "failed to open source",
    "failed to open sink",
    "read error",
    "write error",
    "DST decode error",
    "PCM conversion error",
    "operation cancelled",
    "no source configured",
    "no sinks configured",
    "track not found",
    "invalid track specification",
    "unsupported operation",
    "codec not available",
    "internal error",
];

impl PipelineError {
    /// Stable integer code for this error kind. `0` is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => -1,
            Self::OutOfMemory => -2,
            Self::NotConfigured => -3,
            Self::AlreadyRunning => -4,
            Self::SourceOpen(_) => -5,
            Self::SinkOpen(_) => -6,
            Self::Read(_) => -7,
            Self::Write(_) => -8,
            Self::DstDecode(_) => -9,
            Self::PcmConvert(_) => -10,
            Self::Cancelled => -11,
            Self::NoSource => -12,
            Self::NoSinks => -13,
            Self::TrackNotFound(_) => -14,
            Self::InvalidTrackSpec(_) => -15,
            Self::Unsupported(_) => -16,
            Self::CodecUnavailable(_) => -17,
            Self::Internal(_) => -18,
        }
    }

    /// Whether this is a user-requested abort rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Generic message for an error code, without call-site context.
pub fn error_string(code: i32) -> &'static str {
    if code > 0 {
        return "unknown error";
    }
    ERROR_STRINGS
        .get(code.unsigned_abs() as usize)
        .copied()
        .unwrap_or("unknown error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_index_the_string_table() {
        let samples = [
            PipelineError::InvalidArgument("x".into()),
            PipelineError::OutOfMemory,
            PipelineError::Cancelled,
            PipelineError::TrackNotFound(3),
            PipelineError::Internal("bug".into()),
        ];
        for err in samples {
            let generic = error_string(err.code());
            assert!(err.to_string().starts_with(generic), "{err} vs {generic}");
        }
    }

    #[test]
    fn unknown_codes() {
        assert_eq!(error_string(0), "no error");
        assert_eq!(error_string(-99), "unknown error");
        assert_eq!(error_string(5), "unknown error");
    }

    #[test]
    fn cancellation_is_distinguishable() {
        assert!(PipelineError::Cancelled.is_cancelled());
        assert!(!PipelineError::Read("eof".into()).is_cancelled());
    }
}
