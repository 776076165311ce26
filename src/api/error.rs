//! MEGA API error codes.

/// MEGA API error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    /// Internal error
    Internal = -1,
    /// Invalid arguments
    Args = -2,
    /// Temporary congestion or server malfunction, retry
    Again = -3,
    /// Rate limit exceeded
    RateLimit = -4,
    /// Request failed permanently
    Failed = -5,
    /// Too many concurrent IPs or requests
    TooMany = -6,
    /// Resource access out of range
    Range = -7,
    /// Resource expired
    Expired = -8,
    /// Resource does not exist
    NotExist = -9,
    /// Circular linking
    Circular = -10,
    /// Access denied
    AccessDenied = -11,
    /// Resource already exists
    Exist = -12,
    /// Request incomplete
    Incomplete = -13,
    /// Cryptographic error
    Key = -14,
    /// Bad session
    BadSession = -15,
    /// Resource or user blocked
    Blocked = -16,
    /// Over quota
    OverQuota = -17,
    /// Temporarily unavailable
    TempUnavail = -18,
    /// Too many connections
    TooManyConnections = -19,
    /// Unknown error
    Unknown = -9999,
}

impl From<i64> for ApiErrorCode {
    fn from(code: i64) -> Self {
        match code {
            -1 => ApiErrorCode::Internal,
            -2 => ApiErrorCode::Args,
            -3 => ApiErrorCode::Again,
            -4 => ApiErrorCode::RateLimit,
            -5 => ApiErrorCode::Failed,
            -6 => ApiErrorCode::TooMany,
            -7 => ApiErrorCode::Range,
            -8 => ApiErrorCode::Expired,
            -9 => ApiErrorCode::NotExist,
            -10 => ApiErrorCode::Circular,
            -11 => ApiErrorCode::AccessDenied,
            -12 => ApiErrorCode::Exist,
            -13 => ApiErrorCode::Incomplete,
            -14 => ApiErrorCode::Key,
            -15 => ApiErrorCode::BadSession,
            -16 => ApiErrorCode::Blocked,
            -17 => ApiErrorCode::OverQuota,
            -18 => ApiErrorCode::TempUnavail,
            -19 => ApiErrorCode::TooManyConnections,
            _ => ApiErrorCode::Unknown,
        }
    }
}

impl ApiErrorCode {
    /// Get human-readable description of the error.
    pub fn description(&self) -> &'static str {
        match self {
            ApiErrorCode::Internal => "Internal error",
            ApiErrorCode::Args => "Invalid arguments",
            ApiErrorCode::Again => "Try again",
            ApiErrorCode::RateLimit => "Rate limit exceeded",
            ApiErrorCode::Failed => "Request failed",
            ApiErrorCode::TooMany => "Too many requests",
            ApiErrorCode::Range => "Out of range",
            ApiErrorCode::Expired => "Resource expired",
            ApiErrorCode::NotExist => "Resource does not exist",
            ApiErrorCode::Circular => "Circular linking",
            ApiErrorCode::AccessDenied => "Access denied",
            ApiErrorCode::Exist => "Resource already exists",
            ApiErrorCode::Incomplete => "Request incomplete",
            ApiErrorCode::Key => "Cryptographic error",
            ApiErrorCode::BadSession => "Bad session",
            ApiErrorCode::Blocked => "Resource blocked",
            ApiErrorCode::OverQuota => "Over quota",
            ApiErrorCode::TempUnavail => "Temporarily unavailable",
            ApiErrorCode::TooManyConnections => "Too many connections",
            ApiErrorCode::Unknown => "Unknown error",
        }
    }
}
