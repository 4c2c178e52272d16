// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::std::{
    error,
    fmt,
    io,
};

//==============================================================================
// Structures
//==============================================================================

/// Failure
///
/// Carries a POSIX error code along with a human-readable cause. Every fallible
/// operation in this crate reports through this type.
#[derive(Clone)]
pub struct Fail {
    /// Error code.
    pub errno: i32,
    /// Cause.
    pub cause: String,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for Failures
impl Fail {
    /// Creates a new [Fail].
    pub fn new(errno: i32, cause: &str) -> Self {
        Self {
            errno,
            cause: cause.to_string(),
        }
    }

    /// Whether the target [Fail] signals that the in-flight queue was full.
    pub fn is_congestion(&self) -> bool {
        self.errno == libc::EBUSY
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Display Trait Implementation for Failures
impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Debug Trait Implementation for Failures
impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Error Trait Implementation for Failures
impl error::Error for Fail {}

/// Conversion Trait Implementation for I/O Errors
impl From<io::Error> for Fail {
    fn from(e: io::Error) -> Self {
        Self {
            errno: e.raw_os_error().unwrap_or(libc::EIO),
            cause: e.to_string(),
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::Fail;

    #[test]
    fn congestion_is_ebusy() {
        assert!(Fail::new(libc::EBUSY, "fell behind").is_congestion());
        assert!(!Fail::new(libc::EIO, "engine fault").is_congestion());
    }

    #[test]
    fn io_error_keeps_errno() {
        let e: Fail = ::std::io::Error::from_raw_os_error(libc::ENOENT).into();
        assert_eq!(e.errno, libc::ENOENT);
    }
}
