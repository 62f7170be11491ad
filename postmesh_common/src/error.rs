/// The central error type used throughout postmesh.
///
/// All postmesh crates coerce their failures into this type so callers only
/// ever need to match one enum, mirroring how `roslibrust_common::Error` is
/// shared across every backend in that ecosystem.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A record arrived that doesn't match the expected shape for the
    /// current protocol state (wrong `Message` variant, truncated frame,
    /// foreign post id mid-stream, ...). Fatal for the connection it occurred on.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Raised when a client names a topic that has no owner on this broker's
    /// registry.
    #[error("no such topic: {0}")]
    NoSuchTopic(String),

    /// Raised on CREATE_TOPIC for a name that is already owned, locally or
    /// (conceptually) elsewhere in the cluster.
    #[error("topic already exists: {0}")]
    AlreadyExists(String),

    /// A post file name on disk did not match the Topic-DAO naming pattern.
    #[error("bad filename in topic store: {0}")]
    BadFilename(String),

    /// Wraps any I/O failure from the Topic-DAO or the network.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection to the broker (or, client-side, to a peer) was lost.
    #[error("connection to server lost")]
    Disconnected,

    /// A profile-store operation was attempted before `create_new_profile`
    /// or `load_profile` selected an active profile.
    #[error("no active profile")]
    NoActiveProfile,

    /// Wraps `bincode` (de)serialization failures of wire records.
    #[error("wire encoding error: {0}")]
    Encoding(String),

    /// Anything that doesn't cleanly fit in the above, still worth propagating.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Generic result type used throughout postmesh.
pub type Result<T> = std::result::Result<T, Error>;
