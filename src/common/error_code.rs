use std::fmt;

/// ErrorCode is the wire-level result carried inside peer RPC responses. Transport failures are
/// reported separately (see `RpcError`); these codes are protocol answers from the remote replica.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok,
    InvalidState,
    VersionOutdated,
    Busy,
    ObjectNotFound,
    CapacityExceeded,
    Corruption,
    IgnoreBadData,
    LearnFileFailed,
    LocalAppFailure,
    InvalidData,
    IncompleteData,
    Splitting,
    ChildRegistered,
    Timeout,
    NetworkFailure,
}

impl ErrorCode {
    pub fn is_ok(&self) -> bool {
        *self == ErrorCode::Ok
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::InvalidState => 1,
            ErrorCode::VersionOutdated => 2,
            ErrorCode::Busy => 3,
            ErrorCode::ObjectNotFound => 4,
            ErrorCode::CapacityExceeded => 5,
            ErrorCode::Corruption => 6,
            ErrorCode::IgnoreBadData => 7,
            ErrorCode::LearnFileFailed => 8,
            ErrorCode::LocalAppFailure => 9,
            ErrorCode::InvalidData => 10,
            ErrorCode::IncompleteData => 11,
            ErrorCode::Splitting => 12,
            ErrorCode::ChildRegistered => 13,
            ErrorCode::Timeout => 14,
            ErrorCode::NetworkFailure => 15,
        }
    }

    /// Unknown codes decode as `InvalidData` so a newer peer can never be mistaken for `Ok`.
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => ErrorCode::Ok,
            1 => ErrorCode::InvalidState,
            2 => ErrorCode::VersionOutdated,
            3 => ErrorCode::Busy,
            4 => ErrorCode::ObjectNotFound,
            5 => ErrorCode::CapacityExceeded,
            6 => ErrorCode::Corruption,
            7 => ErrorCode::IgnoreBadData,
            8 => ErrorCode::LearnFileFailed,
            9 => ErrorCode::LocalAppFailure,
            11 => ErrorCode::IncompleteData,
            12 => ErrorCode::Splitting,
            13 => ErrorCode::ChildRegistered,
            14 => ErrorCode::Timeout,
            15 => ErrorCode::NetworkFailure,
            _ => ErrorCode::InvalidData,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Ok => "ERR_OK",
            ErrorCode::InvalidState => "ERR_INVALID_STATE",
            ErrorCode::VersionOutdated => "ERR_VERSION_OUTDATED",
            ErrorCode::Busy => "ERR_BUSY",
            ErrorCode::ObjectNotFound => "ERR_OBJECT_NOT_FOUND",
            ErrorCode::CapacityExceeded => "ERR_CAPACITY_EXCEEDED",
            ErrorCode::Corruption => "ERR_CORRUPTION",
            ErrorCode::IgnoreBadData => "ERR_IGNORE_BAD_DATA",
            ErrorCode::LearnFileFailed => "ERR_LEARN_FILE_FAILED",
            ErrorCode::LocalAppFailure => "ERR_LOCAL_APP_FAILURE",
            ErrorCode::InvalidData => "ERR_INVALID_DATA",
            ErrorCode::IncompleteData => "ERR_INCOMPLETE_DATA",
            ErrorCode::Splitting => "ERR_SPLITTING",
            ErrorCode::ChildRegistered => "ERR_CHILD_REGISTERED",
            ErrorCode::Timeout => "ERR_TIMEOUT",
            ErrorCode::NetworkFailure => "ERR_NETWORK_FAILURE",
        };
        write!(f, "{}", name)
    }
}
