/// Result alias that carries the custom [`VisualHiveError`] type.
pub type Result<T> = std::result::Result<T, VisualHiveError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum VisualHiveError {
    /// Free-form failure that does not warrant its own variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The configuration file could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    /// The spectral analysis stage rejected its buffers.
    #[error("fft failure: {0}")]
    Fft(#[from] realfft::FftError),
    /// Neither a sync session nor an audio input could be reached at startup.
    #[error("no tempo source available: {0}")]
    NoTempoSource(String),
    /// The catalog has no background or the default one failed to open.
    #[error("no default background asset could be opened")]
    NoDefaultBackground,
    /// An asset failed to open while switching.
    #[error("could not open asset `{asset}`: {reason}")]
    AssetOpen { asset: String, reason: String },
    /// Two assets were bound to the same key.
    #[error("key `{key}` is bound to both `{first}` and `{second}`")]
    DuplicateKey {
        key: char,
        first: String,
        second: String,
    },
    /// A shared lock was poisoned by a panicking thread.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
}

impl VisualHiveError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Startup preconditions the engine cannot run without.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoTempoSource(_) | Self::NoDefaultBackground)
    }
}

impl From<&str> for VisualHiveError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VisualHiveError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
