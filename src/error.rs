use thiserror::Error;

use crate::protocol::ErrorSeverity;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All errors surfaced by this library.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying websocket transport failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An HTTP request to the node's REST API failed to complete.
    #[error("http request error: {0}")]
    Request(#[from] reqwest::Error),

    /// A payload could not be serialized or deserialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A REST endpoint URL could not be built.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// A query-classification pattern failed to compile.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// The node rejected our credentials during the websocket handshake.
    #[error("invalid authorization passed for node {identifier:?}")]
    AuthorizationFailure { identifier: String },

    /// The websocket handshake was rejected for a reason other than auth.
    #[error("failed websocket handshake with node {identifier:?} (status {status})")]
    HandshakeFailure { identifier: String, status: u16 },

    /// The websocket connection could not be established at all.
    #[error("failed connecting to node {identifier:?}: {source}")]
    ConnectionFailure {
        identifier: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// The node is not connected; the operation requires a live websocket.
    #[error("node {identifier:?} has no running websocket connection")]
    NodeNotConnected { identifier: String },

    /// The REST API answered with a non-success status code.
    #[error("node responded with HTTP status {status}")]
    Http { status: u16 },

    /// The requested resource does not exist on the node.
    #[error("requested resource was not found")]
    NotFound,

    /// A node with the same identifier is already registered on the pool.
    #[error("node identifier {0:?} is already in use")]
    NodeConflict(String),

    /// The pool holds no nodes at all.
    #[error("no available nodes on this pool")]
    NoAvailableNodes,

    /// No node in the pool matched the requested identifier and/or region.
    #[error("no node matching identifier {identifier:?} / region {region:?} found in this pool")]
    NoMatchingNodes {
        identifier: Option<String>,
        region: Option<String>,
    },

    /// No player exists for the guild.
    #[error("player for guild {0} not found")]
    PlayerNotFound(u64),

    /// A search query produced no results.
    #[error("no matches found for query {query:?}")]
    NoMatches { query: String },

    /// The node failed to load tracks for a query.
    #[error("could not load tracks: {message} (severity: {severity:?})")]
    LoadFailed {
        message: String,
        severity: ErrorSeverity,
    },

    /// The player has no established voice session.
    #[error("player for guild {0} is not connected to a voice channel")]
    NotConnected(u64),

    /// The queue reached its configured maximum size.
    #[error("queue reached max size of {max_size}")]
    QueueFull { max_size: usize },

    /// A caller-supplied value was out of range.
    #[error("{0}")]
    InvalidArgument(String),

    /// The requested feature is not supported by this client.
    #[error("{0} is not supported")]
    Unsupported(&'static str),

    /// Required configuration was missing or malformed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
