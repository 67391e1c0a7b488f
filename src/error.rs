use thiserror::Error;

use crate::verifier::VerifierFailure;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library
/// can potentially return.
///
/// # Error Categories
///
/// ## Verification Outcomes
/// - [`Error::Verification`] - the method failed verification; carries the
///   first [`VerifierFailure`] including its error kind, IL offset, and
///   argument list
///
/// ## Service Input Errors
/// - [`Error::Malformed`] - an external service handed the verifier data that
///   violates its contract (a region outside the body, a missing signature)
/// - [`Error::OutOfBounds`] - a raw read past the end of a byte stream before
///   it could be attributed to a specific instruction
///
/// # Examples
///
/// ```rust,ignore
/// match verifier.verify(method, declaring_type) {
///     Ok(()) => println!("verified"),
///     Err(cilverify::Error::Verification(failure)) => {
///         eprintln!("unverifiable: {failure}");
///     }
///     Err(e) => eprintln!("service failure: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The method failed verification.
    ///
    /// Carries the first failure encountered under the fail-fast policy. Use
    /// [`crate::Verifier::verify_collect`] to obtain every failure instead.
    #[error("verification failed - {0}")]
    Verification(VerifierFailure),

    /// An external service provided data violating its contract.
    ///
    /// This is not a property of the IL under verification but of the host
    /// integration, so it is reported separately from verifier failures.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading a byte stream.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
