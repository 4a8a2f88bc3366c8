use std::io;

/// Failures talking to the synth over its shell socket.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("cannot connect to synth at {addr}: {source}")]
    Connect { addr: String, source: io::Error },
    #[error("synth connection lost: {0}")]
    Io(#[from] io::Error),
    #[error("synth closed the connection; call connect() to retry")]
    Dropped,
    #[error("bad line pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A line or field that doesn't have the expected shape.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolParseError {
    #[error("field '{0}' missing from record")]
    MissingField(String),
    #[error("field '{field}' has unparsable value '{value}'")]
    BadValue { field: String, value: String },
}

/// The matcher was asked for captures it doesn't currently hold.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("no current match: the last line did not match (or nothing was matched yet)")]
pub struct StateError;

/// A channel assignment points at an instrument the tree doesn't know about.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("channel {channel} is bound to {font}/{bank}/{program} ({name}), which is not in the instrument listing")]
pub struct LookupError {
    pub channel: u8,
    pub font: u32,
    pub bank: u32,
    pub program: u32,
    pub name: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PathKeyError {
    #[error("path segment '{0}' contains '/'")]
    Slash(String),
    #[error("path segments must not be empty")]
    Empty,
    #[error("path keys hold at most {max} segments, got {got}")]
    TooDeep { max: usize, got: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum MetronomeError {
    #[error("tempo must be a positive number of beats per minute, got {0}")]
    Tempo(f64),
    #[error("a track needs at least one beat")]
    EmptyTrack,
    #[error("bad note '{0}' in track")]
    Note(String),
    #[error("cannot spawn beat clock thread: {0}")]
    Spawn(#[from] io::Error),
}
