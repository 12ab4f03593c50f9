// Error types for the binaural engine
//
// Only backend activation can fail from the caller's point of view; every
// other invalid call on the engine degrades to a logged no-op. The codes below
// give hosts a stable numeric handle on the failures that do surface.

mod audio;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// host boundaries.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
