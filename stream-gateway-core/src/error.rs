use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Top-level error kind; each variant corresponds to one HTTP status class
/// at the boundary (mapped in the server crate, never here).
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Provider path, session id, or prequeue id unknown.
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing or invalid query/body parameter.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Operation conflicts with current state (delete-while-running,
    /// prequeue-not-ready, seek on an already-stopped session, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A Dolby Vision profile is incompatible with the active HDR/DV policy.
    /// Carries a stable machine-readable code for the client.
    #[error("policy violation ({code}): {message}")]
    PolicyViolation { code: String, message: String },

    /// A deadline (search/probe) elapsed before the operation completed.
    #[error("gateway timeout: {0}")]
    GatewayTimeout(String),

    /// The upstream indexer, provider, or external URL misbehaved.
    #[error("bad gateway: {0}")]
    BadGateway(String),

    /// ffmpeg/ffprobe process failure.
    #[error("process error: {0}")]
    Process(#[from] ProcessError),

    /// Video characterisation failed through every fallback strategy.
    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),

    /// Disk IO or other unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The client went away (EPIPE/ECONNRESET/context-cancel). Detected at
    /// the innermost write and bubbled up as a normal, unlogged return so
    /// call sites can route it away from `Internal` rather than log it as
    /// an error.
    #[error("client gone")]
    ClientGone,
}

impl GatewayError {
    pub fn not_found(what: impl Into<String>) -> Self {
        GatewayError::NotFound(what.into())
    }

    pub fn dv_profile_incompatible(profile: &str) -> Self {
        GatewayError::PolicyViolation {
            code: "DV_PROFILE_INCOMPATIBLE".to_string(),
            message: format!(
                "Dolby Vision profile {profile} has no HDR10 fallback and is rejected under the active HDR/DV policy"
            ),
        }
    }

    /// Stable machine-readable code surfaced to clients.
    pub fn code(&self) -> Option<&str> {
        match self {
            GatewayError::GatewayTimeout(_) => Some("GATEWAY_TIMEOUT"),
            GatewayError::BadGateway(_) => Some("BAD_GATEWAY"),
            GatewayError::PolicyViolation { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// ffmpeg/ffprobe subprocess failure modes.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {status}: {stderr_tail}")]
    NonZeroExit {
        program: String,
        status: i32,
        stderr_tail: String,
    },

    #[error("{program} did not exit within {timeout_secs}s and was killed")]
    TimedOut { program: String, timeout_secs: u64 },

    #[error("failed to write to {program}'s stdin: {0}")]
    StdinWrite(std::io::Error),
}

/// Video-characterisation failure modes, per the fallback chain.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("all probe strategies failed for {path}: {last_error}")]
    AllStrategiesFailed { path: String, last_error: String },

    #[error("ffprobe produced unparseable output: {0}")]
    UnparseableOutput(String),

    #[error("source has no video stream")]
    NoVideoStream,
}

/// Best-effort classification of an IO failure as "client went away" vs a
/// real error.
pub fn is_client_gone(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    if matches!(
        err.kind(),
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
    ) {
        return true;
    }
    let msg = err.to_string().to_lowercase();
    msg.contains("broken pipe") || msg.contains("connection reset") || msg.contains("epipe")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dv_profile_incompatible_carries_stable_code() {
        let err = GatewayError::dv_profile_incompatible("dvhe.05.06");
        assert_eq!(err.code(), Some("DV_PROFILE_INCOMPATIBLE"));
    }

    #[test]
    fn client_gone_detection_matches_broken_pipe() {
        let err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        assert!(is_client_gone(&err));
        let err = std::io::Error::other("some other io failure");
        assert!(!is_client_gone(&err));
    }

    #[test]
    fn timeout_and_gateway_errors_carry_codes() {
        assert_eq!(
            GatewayError::GatewayTimeout("probe".into()).code(),
            Some("GATEWAY_TIMEOUT")
        );
        assert_eq!(
            GatewayError::BadGateway("indexer".into()).code(),
            Some("BAD_GATEWAY")
        );
        assert_eq!(GatewayError::NotFound("x".into()).code(), None);
    }
}
