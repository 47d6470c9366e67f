use crate::bus::BusError;
use crate::config::ConfigError;
use crate::watch::WatchError;
use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Log and retry on the next signal.
    TransientIo,
    /// Plugin shows its empty state.
    SourceVanished,
    /// Skip the record and keep building.
    CorruptRecord,
    /// Refuse the operation and report where it originated.
    InvariantViolation,
    ChildProcessDied,
    StaleEpoch,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::TransientIo => "transient-io",
            ErrorClass::SourceVanished => "source-vanished",
            ErrorClass::CorruptRecord => "corrupt-record",
            ErrorClass::InvariantViolation => "invariant-violation",
            ErrorClass::ChildProcessDied => "child-process-died",
            ErrorClass::StaleEpoch => "stale-epoch",
        }
    }

    /// Whether the error should reach the user at all.
    pub fn is_reported(self) -> bool {
        !matches!(self, ErrorClass::StaleEpoch)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Classify {
    fn class(&self) -> ErrorClass;
}

pub fn classify_io(err: &io::Error) -> ErrorClass {
    match err.kind() {
        io::ErrorKind::NotFound => ErrorClass::SourceVanished,
        io::ErrorKind::InvalidData => ErrorClass::CorruptRecord,
        io::ErrorKind::InvalidInput | io::ErrorKind::AlreadyExists => {
            ErrorClass::InvariantViolation
        }
        _ => ErrorClass::TransientIo,
    }
}

impl Classify for io::Error {
    fn class(&self) -> ErrorClass {
        classify_io(self)
    }
}

impl Classify for BusError {
    fn class(&self) -> ErrorClass {
        ErrorClass::StaleEpoch
    }
}

impl Classify for WatchError {
    fn class(&self) -> ErrorClass {
        match self {
            WatchError::MissingRoot(_) => ErrorClass::SourceVanished,
            WatchError::Backend(_) => ErrorClass::TransientIo,
        }
    }
}

impl Classify for ConfigError {
    fn class(&self) -> ErrorClass {
        match self {
            ConfigError::Io { source, .. } => classify_io(source),
            ConfigError::Parse { .. } | ConfigError::Invalid { .. } => ErrorClass::CorruptRecord,
            ConfigError::Serialize(_) => ErrorClass::InvariantViolation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_watch_root_is_source_vanished() {
        let err = WatchError::MissingRoot(PathBuf::from("/nowhere"));
        assert_eq!(err.class(), ErrorClass::SourceVanished);
    }

    #[test]
    fn io_kinds_map_onto_taxonomy() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(denied.class(), ErrorClass::TransientIo);
        let gone = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(gone.class(), ErrorClass::SourceVanished);
        assert!(!ErrorClass::StaleEpoch.is_reported());
    }
}
