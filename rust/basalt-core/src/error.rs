// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Basalt Authors

use snafu::{Location, Snafu};

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Allocates error on the heap and then places `e` into it.
#[inline]
pub fn box_error(e: impl std::error::Error + Send + Sync + 'static) -> BoxedError {
    Box::new(e)
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("BasaltError(IO): {source}, {location}"))]
    IO {
        source: BoxedError,
        location: Location,
    },
    #[snafu(display("Not found: {uri}, {location}"))]
    NotFound { uri: String, location: Location },
    #[snafu(display("Encountered corrupt file {path}: {source}, {location}"))]
    CorruptFile {
        path: object_store::path::Path,
        source: BoxedError,
        location: Location,
    },
    #[snafu(display("Invalid user input: {source}, {location}"))]
    InvalidInput {
        source: BoxedError,
        location: Location,
    },
    #[snafu(display("Encountered internal error. Please file a bug report at https://github.com/basalt-db/basalt/issues. {message}, {location}"))]
    Internal { message: String, location: Location },
    #[snafu(display("Not supported: {source}, {location}"))]
    NotSupported {
        source: BoxedError,
        location: Location,
    },
    #[snafu(display("Aborted: {message}, {location}"))]
    Aborted { message: String, location: Location },
    #[snafu(display("Cancelled: {message}, {location}"))]
    Cancelled { message: String, location: Location },
    /// End of stream. Not a failure; terminates scan loops cleanly.
    #[snafu(display("End of file: {message}"))]
    EndOfFile { message: String },
    #[snafu(display("Cloned error: {message}, {location}"))]
    Cloned { message: String, location: Location },
}

impl Error {
    pub fn io(message: impl Into<String>, location: Location) -> Self {
        let message: String = message.into();
        Self::IO {
            source: message.into(),
            location,
        }
    }

    #[track_caller]
    pub fn not_found(uri: impl Into<String>) -> Self {
        Self::NotFound {
            uri: uri.into(),
            location: std::panic::Location::caller().to_snafu_location(),
        }
    }

    pub fn corrupt_file(
        path: object_store::path::Path,
        message: impl Into<String>,
        location: Location,
    ) -> Self {
        let message: String = message.into();
        Self::CorruptFile {
            path,
            source: message.into(),
            location,
        }
    }

    pub fn invalid_input(message: impl Into<String>, location: Location) -> Self {
        let message: String = message.into();
        Self::InvalidInput {
            source: message.into(),
            location,
        }
    }

    pub fn internal(message: impl Into<String>, location: Location) -> Self {
        let message: String = message.into();
        Self::Internal { message, location }
    }

    pub fn not_supported(message: impl Into<String>, location: Location) -> Self {
        let message: String = message.into();
        Self::NotSupported {
            source: message.into(),
            location,
        }
    }

    pub fn aborted(message: impl Into<String>, location: Location) -> Self {
        let message: String = message.into();
        Self::Aborted { message, location }
    }

    pub fn cancelled(message: impl Into<String>, location: Location) -> Self {
        let message: String = message.into();
        Self::Cancelled { message, location }
    }

    pub fn end_of_file(message: impl Into<String>) -> Self {
        Self::EndOfFile {
            message: message.into(),
        }
    }

    pub fn is_end_of_file(&self) -> bool {
        matches!(self, Self::EndOfFile { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Duplicates this error for fan-out across threads.
    ///
    /// The control-flow variants keep their identity; everything else is
    /// flattened into a `Cloned` carrying the display message, since error
    /// sources are not `Clone`.
    #[track_caller]
    pub fn cloned(&self) -> Self {
        match self {
            Self::EndOfFile { message } => Self::EndOfFile {
                message: message.clone(),
            },
            Self::Aborted { message, location } => Self::Aborted {
                message: message.clone(),
                location: *location,
            },
            Self::Cancelled { message, location } => Self::Cancelled {
                message: message.clone(),
                location: *location,
            },
            Self::NotFound { uri, location } => Self::NotFound {
                uri: uri.clone(),
                location: *location,
            },
            Self::Internal { message, location } => Self::Internal {
                message: message.clone(),
                location: *location,
            },
            other => Self::Cloned {
                message: other.to_string(),
                location: std::panic::Location::caller().to_snafu_location(),
            },
        }
    }
}

pub trait BasaltOptionExt<T> {
    /// Unwraps an option, returning an internal error if the option is None.
    fn expect_ok(self) -> Result<T>;
}

impl<T> BasaltOptionExt<T> for Option<T> {
    #[track_caller]
    fn expect_ok(self) -> Result<T> {
        let location = std::panic::Location::caller().to_snafu_location();
        self.ok_or_else(|| Error::Internal {
            message: "Expected option to have value".to_string(),
            location,
        })
    }
}

pub trait ToSnafuLocation {
    fn to_snafu_location(&'static self) -> snafu::Location;
}

impl ToSnafuLocation for std::panic::Location<'static> {
    fn to_snafu_location(&'static self) -> snafu::Location {
        snafu::Location::new(self.file(), self.line(), self.column())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use snafu::location;

    #[test]
    fn end_of_file_is_control_flow() {
        let e = Error::end_of_file("scan drained");
        assert!(e.is_end_of_file());
        assert!(!e.is_not_found());
        let c = e.cloned();
        assert!(c.is_end_of_file());
    }

    #[test]
    fn cloned_flattens_sourced_variants() {
        let e = Error::io("disk on fire", location!());
        match e.cloned() {
            Error::Cloned { message, .. } => assert!(message.contains("disk on fire")),
            other => panic!("expected Cloned, got {other:?}"),
        }
    }

    #[test]
    fn expect_ok_turns_none_into_internal() {
        assert_eq!(Some(5).expect_ok().unwrap(), 5);
        let err = None::<u32>.expect_ok().unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
    }

    #[test]
    fn not_found_keeps_uri_across_clone() {
        let e = Error::not_found("s3://bucket/tbl_0000000000000001_2");
        match e.cloned() {
            Error::NotFound { uri, .. } => assert!(uri.ends_with("_2")),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
