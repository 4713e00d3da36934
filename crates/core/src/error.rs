/// Result alias that carries the custom [`SpectraError`] type.
pub type Result<T> = std::result::Result<T, SpectraError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum SpectraError {
    /// The engine was configured with values it cannot run with, such as a
    /// non power-of-two FFT size. Raised at construction time only.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A caller supplied buffer does not have the length the engine was
    /// configured with.
    #[error("{buffer} buffer has length {actual}, expected {expected}")]
    SizeMismatch {
        buffer: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Capture device, decoder or output sink could not be opened.
    #[error("audio source unavailable: {0}")]
    SourceUnavailable(String),
    /// Internal state that should not happen, e.g. a poisoned lock.
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Wav(#[from] hound::Error),
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl SpectraError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid_config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn unavailable<T: Into<String>>(msg: T) -> Self {
        Self::SourceUnavailable(msg.into())
    }

    /// Checks a caller supplied buffer length against the configured size.
    pub(crate) fn check_len(buffer: &'static str, expected: usize, actual: usize) -> Result<()> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::SizeMismatch {
                buffer,
                expected,
                actual,
            })
        }
    }
}

impl From<&str> for SpectraError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SpectraError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_mismatch_names_the_buffer() {
        let err = SpectraError::check_len("bars", 8, 7).unwrap_err();
        assert!(matches!(
            err,
            SpectraError::SizeMismatch {
                buffer: "bars",
                expected: 8,
                actual: 7
            }
        ));
        assert_eq!(err.to_string(), "bars buffer has length 7, expected 8");
    }

    #[test]
    fn matching_length_passes() {
        assert!(SpectraError::check_len("waveform", 16, 16).is_ok());
    }
}
