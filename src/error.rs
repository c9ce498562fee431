use thiserror::Error;

#[derive(Error, Debug)]
pub enum MorseError {
    #[error("Audio device unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Audio stream failure: {0}")]
    IoFailure(String),

    #[error("Wait for audio completion was interrupted")]
    InterruptedWait,

    #[error("Timeout waiting for playback to finish")]
    Timeout,

    #[error("Invalid Morse symbol: {0:?}")]
    InvalidSymbol(char),

    #[error("Symbol table not found: {0}")]
    MissingResource(String),

    #[error("Malformed symbol table at line {line}: {reason}")]
    MalformedTable { line: usize, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MorseError>;
