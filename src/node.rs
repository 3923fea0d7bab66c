//! Nodes and their websocket/REST plumbing.
//!
//! A [`Node`] wraps one connection to a Lavalink-compatible backend. The
//! websocket carries player commands out and player updates, statistics
//! and playback events back in; track loading and decoding go over the
//! node's REST API. Handles are cheap to clone and shared across tasks.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::events::{
    EventHandler, NoopHandler, TrackEndEvent, TrackExceptionEvent, TrackStartEvent,
    TrackStuckEvent, WebSocketCloseEvent,
};
use crate::player::Player;
use crate::pool::PoolInner;
use crate::protocol::{
    EventPayload, IncomingMessage, LoadResponse, LoadType, OutgoingMessage, PlaylistInfo, Source,
    TrackInfo, TrackPayload,
};
use crate::stats::Stats;
use crate::track::{Playlist, Track};

/// Close code Lavalink sends when it hit an unrecoverable internal
/// error; reconnecting would just fail again.
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Timeout the node is asked to keep a resumable session alive for.
const RESUME_TIMEOUT_SECS: u64 = 60;

/// What a `loadtracks` call produced.
#[derive(Debug, Clone)]
pub enum SearchResult {
    /// A single track or a list of search hits.
    Tracks(Vec<Track>),
    /// A whole playlist.
    Playlist(Playlist),
}

/// Options for [`Node::search_tracks`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Platform to search on when the query is not a direct URL.
    pub source: Option<Source>,
    /// Treat the query as a plain search term even when it looks like a
    /// URL.
    pub strict: bool,
    /// Return a playlist's full track list instead of just its selected
    /// track.
    pub flatten_playlists: bool,
    /// Cap on the number of returned tracks.
    pub limit: Option<usize>,
}

/// Handle to a single backend node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    identifier: String,
    config: NodeConfig,
    connection: ConnectionManager,
    players: DashMap<u64, Player>,
    stats: RwLock<Option<Stats>>,
    handler: Arc<dyn EventHandler>,
    pool: Mutex<Option<Weak<PoolInner>>>,
}

struct ConnectionManager {
    http: reqwest::Client,
    /// Key re-sent on reconnect so the node resumes the old session.
    resume_key: Option<String>,
    tx: RwLock<Option<mpsc::UnboundedSender<Message>>>,
    /// Cleared on explicit disconnect so the listener does not ask the
    /// supervisor for a new connection.
    keep_alive: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    /// Wakes the supervisor task; the listener cannot reconnect itself
    /// without its own future becoming recursive.
    reconnect_tx: RwLock<Option<mpsc::UnboundedSender<()>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Creates a node from its configuration without connecting yet.
    pub fn new(config: NodeConfig, handler: Option<Arc<dyn EventHandler>>) -> Self {
        let identifier = config
            .identifier
            .clone()
            .unwrap_or_else(|| format!("{:016x}", rand::random::<u64>()));
        let resume_key = config
            .resume
            .then(|| format!("{:016x}", rand::random::<u64>()));

        Self {
            inner: Arc::new(NodeInner {
                identifier,
                config,
                connection: ConnectionManager {
                    http: reqwest::Client::new(),
                    resume_key,
                    tx: RwLock::new(None),
                    keep_alive: AtomicBool::new(false),
                    listener: Mutex::new(None),
                    writer: Mutex::new(None),
                    reconnect_tx: RwLock::new(None),
                    supervisor: Mutex::new(None),
                },
                players: DashMap::new(),
                stats: RwLock::new(None),
                handler: handler.unwrap_or_else(|| Arc::new(NoopHandler)),
                pool: Mutex::new(None),
            }),
        }
    }

    /// Creates a node and connects it in one step.
    pub async fn start(
        config: NodeConfig,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Result<Self> {
        let node = Self::new(config, handler);
        node.connect().await?;
        Ok(node)
    }

    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Voice region this node serves, when configured.
    pub fn region(&self) -> Option<&str> {
        self.inner.config.region.as_deref()
    }

    /// Latest statistics frame the node pushed, if any arrived yet.
    pub fn stats(&self) -> Option<Stats> {
        self.inner.stats.read().clone()
    }

    /// Whether the websocket is currently up.
    pub fn is_connected(&self) -> bool {
        self.inner.connection.tx.read().is_some()
    }

    /// Returns the player for a guild, creating one on first use.
    pub fn player(&self, guild_id: u64) -> Player {
        self.inner
            .players
            .entry(guild_id)
            .or_insert_with(|| Player::new(self.clone(), guild_id))
            .clone()
    }

    /// Returns the player for a guild, failing when none exists.
    pub fn get_player(&self, guild_id: u64) -> Result<Player> {
        self.inner
            .players
            .get(&guild_id)
            .map(|entry| entry.clone())
            .ok_or(Error::PlayerNotFound(guild_id))
    }

    pub fn players(&self) -> Vec<Player> {
        self.inner
            .players
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn player_count(&self) -> usize {
        self.inner.players.len()
    }

    pub(crate) fn remove_player(&self, guild_id: u64) {
        self.inner.players.remove(&guild_id);
    }

    pub(crate) fn set_pool(&self, pool: Weak<PoolInner>) {
        *self.inner.pool.lock() = Some(pool);
    }

    /// Opens the websocket connection and starts the reader/writer tasks.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connection.keep_alive.store(true, Ordering::SeqCst);
        {
            let mut supervisor = self.inner.connection.supervisor.lock();
            if supervisor.is_none() {
                let (tx, mut rx) = mpsc::unbounded_channel::<()>();
                *self.inner.connection.reconnect_tx.write() = Some(tx);
                let node = self.clone();
                *supervisor = Some(tokio::spawn(async move {
                    while rx.recv().await.is_some() {
                        node.reconnect().await;
                    }
                }));
            }
        }
        self.connect_inner(false).await
    }

    async fn connect_inner(&self, resumed: bool) -> Result<()> {
        let config = &self.inner.config;
        let mut request = config.ws_url().into_client_request()?;
        {
            let headers = request.headers_mut();
            if let Some(password) = &config.password {
                headers.insert("Authorization", header_value(password)?);
            }
            headers.insert("User-Id", header_value(&config.user_id.to_string())?);
            headers.insert(
                "Client-Name",
                HeaderValue::from_static(concat!("tephra/", env!("CARGO_PKG_VERSION"))),
            );
            if let Some(key) = &self.inner.connection.resume_key {
                headers.insert("Resume-Key", header_value(key)?);
            }
        }

        info!(
            "🔌 Connecting to node {} at {}",
            self.inner.identifier,
            config.ws_url()
        );
        let (stream, _) = connect_async(request)
            .await
            .map_err(|err| self.map_connect_error(err))?;
        let (mut sink, mut source) = stream.split();

        // Replace any tasks left over from a previous session.
        if let Some(handle) = self.inner.connection.listener.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.inner.connection.writer.lock().take() {
            handle.abort();
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.inner.connection.tx.write() = Some(tx);

        let heartbeat = config.heartbeat;
        let identifier = self.inner.identifier.clone();
        let writer = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    message = rx.recv() => match message {
                        Some(message) => {
                            if let Err(err) = sink.send(message).await {
                                warn!("node {identifier}: websocket write failed: {err}");
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = interval.tick() => {
                        if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        *self.inner.connection.writer.lock() = Some(writer);

        let node = self.clone();
        let listener = tokio::spawn(async move {
            let mut fatal = false;
            while let Some(next) = source.next().await {
                match next {
                    Ok(Message::Text(text)) => match serde_json::from_str(text.as_str()) {
                        Ok(message) => node.handle_message(message).await,
                        Err(err) => {
                            debug!(
                                "node {}: unrecognized payload ({err}): {text}",
                                node.inner.identifier
                            );
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        warn!(
                            "node {} closed the websocket (code {:?})",
                            node.inner.identifier, code
                        );
                        fatal = code == Some(CLOSE_INTERNAL_ERROR);
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(
                            "node {}: websocket read failed: {err}",
                            node.inner.identifier
                        );
                        break;
                    }
                }
            }
            node.inner.connection.tx.write().take();

            if fatal {
                error!(
                    "node {} reported an internal error, giving up on this session",
                    node.inner.identifier
                );
                node.inner
                    .connection
                    .keep_alive
                    .store(false, Ordering::SeqCst);
                return;
            }
            if node.inner.connection.keep_alive.load(Ordering::SeqCst) {
                // Reconnecting replaces this very task, so the supervisor
                // does it.
                let tx = node.inner.connection.reconnect_tx.read().clone();
                if let Some(tx) = tx {
                    let _ = tx.send(());
                }
            }
        });
        *self.inner.connection.listener.lock() = Some(listener);

        if let Some(key) = &self.inner.connection.resume_key {
            self.send(OutgoingMessage::ConfigureResuming {
                key: key.clone(),
                timeout: RESUME_TIMEOUT_SECS,
            })
            .await?;
        }

        // Re-establish voice connections the node may have lost.
        if resumed {
            for player in self.players() {
                if let Some(message) = player.voice_update_message() {
                    self.send(message).await?;
                }
            }
        }

        info!("✅ Node {} is ready (resumed: {resumed})", self.inner.identifier);
        let handler = Arc::clone(&self.inner.handler);
        let node = self.clone();
        tokio::spawn(async move { handler.node_ready(node, resumed).await });
        Ok(())
    }

    fn map_connect_error(&self, err: tungstenite::Error) -> Error {
        match err {
            tungstenite::Error::Http(response) => {
                let status = response.status();
                if status == tungstenite::http::StatusCode::UNAUTHORIZED
                    || status == tungstenite::http::StatusCode::FORBIDDEN
                {
                    Error::AuthorizationFailure {
                        identifier: self.inner.identifier.clone(),
                    }
                } else {
                    Error::HandshakeFailure {
                        identifier: self.inner.identifier.clone(),
                        status: status.as_u16(),
                    }
                }
            }
            source => Error::ConnectionFailure {
                identifier: self.inner.identifier.clone(),
                source,
            },
        }
    }

    async fn reconnect(&self) {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let delay = Duration::from_secs(3u64.saturating_pow(attempt).min(60));
            info!(
                "⏳ Reconnecting to node {} in {delay:?} (attempt {attempt})",
                self.inner.identifier
            );
            tokio::time::sleep(delay).await;

            if !self.inner.connection.keep_alive.load(Ordering::SeqCst) {
                return;
            }
            match self.connect_inner(true).await {
                Ok(()) => return,
                Err(err) => warn!(
                    "node {}: reconnect attempt {attempt} failed: {err}",
                    self.inner.identifier
                ),
            }
        }
    }

    /// Closes the websocket without destroying players on the node side.
    pub fn disconnect(&self) {
        self.inner
            .connection
            .keep_alive
            .store(false, Ordering::SeqCst);
        // Queue a Close frame, then drop the sender; the writer drains
        // the channel, sends the frame and exits on its own.
        if let Some(tx) = self.inner.connection.tx.write().take() {
            let _ = tx.send(Message::Close(None));
        }
        if let Some(handle) = self.inner.connection.listener.lock().take() {
            handle.abort();
        }
        self.inner.connection.writer.lock().take();
        if let Some(handle) = self.inner.connection.supervisor.lock().take() {
            handle.abort();
        }
        self.inner.connection.reconnect_tx.write().take();
        info!("👋 Disconnected from node {}", self.inner.identifier);
    }

    /// Destroys every player on the node, closes the websocket and
    /// removes the node from its pool.
    pub async fn destroy(&self) -> Result<()> {
        for player in self.players() {
            // Best effort; the socket may already be gone.
            if let Err(err) = player.destroy().await {
                debug!(
                    "node {}: failed to destroy player {}: {err}",
                    self.inner.identifier,
                    player.guild_id()
                );
            }
        }
        self.disconnect();

        if let Some(pool) = self.inner.pool.lock().take() {
            if let Some(pool) = pool.upgrade() {
                pool.nodes.remove(&self.inner.identifier);
            }
        }
        Ok(())
    }

    /// Queues a message onto the websocket writer.
    pub(crate) async fn send(&self, message: OutgoingMessage) -> Result<()> {
        let json = serde_json::to_string(&message)?;
        let tx = self.inner.connection.tx.read().clone();
        match tx {
            Some(tx) if tx.send(Message::Text(json.into())).is_ok() => Ok(()),
            _ => Err(Error::NodeNotConnected {
                identifier: self.inner.identifier.clone(),
            }),
        }
    }

    async fn handle_message(&self, message: IncomingMessage) {
        match message {
            IncomingMessage::PlayerUpdate { guild_id, state } => {
                let Ok(guild_id) = guild_id.parse::<u64>() else {
                    return;
                };
                if let Some(player) = self.inner.players.get(&guild_id) {
                    player.update_state(&state);
                }
            }
            IncomingMessage::Stats(stats) => {
                *self.inner.stats.write() = Some(stats.clone());
                let handler = Arc::clone(&self.inner.handler);
                let node = self.clone();
                tokio::spawn(async move { handler.stats_update(node, stats).await });
            }
            IncomingMessage::Event(event) => self.handle_event(event),
        }
    }

    fn handle_event(&self, event: EventPayload) {
        let Some(guild_id) = event.guild_id() else {
            debug!(
                "node {}: event with unparseable guild id",
                self.inner.identifier
            );
            return;
        };
        let Some(player) = self
            .inner
            .players
            .get(&guild_id)
            .map(|entry| entry.clone())
        else {
            debug!(
                "node {}: event for guild {guild_id} with no player",
                self.inner.identifier
            );
            return;
        };

        let handler = Arc::clone(&self.inner.handler);
        match event {
            EventPayload::TrackStart { track, .. } => {
                let event = TrackStartEvent {
                    player,
                    track_id: track,
                };
                tokio::spawn(async move { handler.track_start(event).await });
            }
            EventPayload::TrackEnd { track, reason, .. } => {
                player.clear_track();
                let event = TrackEndEvent {
                    player,
                    track_id: track,
                    reason,
                };
                tokio::spawn(async move { handler.track_end(event).await });
            }
            EventPayload::TrackException {
                track, exception, ..
            } => {
                warn!(
                    "node {}: track exception in guild {guild_id}: {} ({:?})",
                    self.inner.identifier, exception.message, exception.severity
                );
                let event = TrackExceptionEvent {
                    player,
                    track_id: track,
                    message: exception.message,
                    severity: exception.severity,
                    cause: exception.cause,
                };
                tokio::spawn(async move { handler.track_exception(event).await });
            }
            EventPayload::TrackStuck {
                track,
                threshold_ms,
                ..
            } => {
                let event = TrackStuckEvent {
                    player,
                    track_id: track,
                    threshold: Duration::from_millis(threshold_ms),
                };
                tokio::spawn(async move { handler.track_stuck(event).await });
            }
            EventPayload::WebSocketClosed {
                code,
                reason,
                by_remote,
                ..
            } => {
                warn!(
                    "node {}: voice websocket for guild {guild_id} closed \
                     (code {code}, by_remote {by_remote})",
                    self.inner.identifier
                );
                // The old voice session is dead either way; the next pair
                // of voice updates rebuilds it.
                player.clear_voice();
                let event = WebSocketCloseEvent {
                    player,
                    code,
                    reason,
                    by_remote,
                };
                tokio::spawn(async move { handler.websocket_closed(event).await });
            }
        }
    }

    async fn rest<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<T> {
        let url = Url::parse_with_params(
            &format!("{}/{endpoint}", self.inner.config.http_url()),
            params,
        )?;
        let mut request = self.inner.connection.http.request(method, url);
        if let Some(password) = &self.inner.config.password {
            request = request.header("Authorization", password);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(Error::NotFound)
        } else {
            Err(Error::Http {
                status: status.as_u16(),
            })
        }
    }

    /// Resolves a query through the node's `loadtracks` endpoint.
    ///
    /// URLs are passed through untouched unless `strict` forces them to
    /// be treated as search terms; everything else gets the `source`'s
    /// search prefix. Surrounding `<...>` (Discord's no-embed markers)
    /// are stripped first.
    pub async fn load_tracks(
        &self,
        query: &str,
        source: Option<Source>,
        strict: bool,
    ) -> Result<SearchResult> {
        if matches!(source, Some(Source::Spotify)) {
            return Err(Error::Unsupported("spotify search"));
        }
        let query = query.trim().trim_matches(|c| c == '<' || c == '>');

        let identifier = if !strict && is_url(query)? {
            query.to_string()
        } else {
            match source.and_then(Source::prefix) {
                Some(prefix) => format!("{prefix}:{query}"),
                None => query.to_string(),
            }
        };

        debug!(
            "node {}: loading tracks for {identifier:?}",
            self.inner.identifier
        );
        let response: LoadResponse = self
            .rest(
                Method::GET,
                "loadtracks",
                &[("identifier", identifier.as_str())],
                None,
            )
            .await?;

        match response.load_type {
            LoadType::NoMatches => Err(Error::NoMatches {
                query: query.to_string(),
            }),
            LoadType::LoadFailed => {
                let (message, severity) = match response.exception {
                    Some(exception) => (exception.message, exception.severity),
                    None => (
                        "load failed without details".to_string(),
                        crate::protocol::ErrorSeverity::Fault,
                    ),
                };
                Err(Error::LoadFailed { message, severity })
            }
            LoadType::PlaylistLoaded => {
                let info = response.playlist_info.unwrap_or(PlaylistInfo {
                    name: String::new(),
                    selected_track: -1,
                });
                Ok(SearchResult::Playlist(Playlist::new(info, response.tracks)))
            }
            LoadType::TrackLoaded | LoadType::SearchResult => Ok(SearchResult::Tracks(
                response.tracks.into_iter().map(Track::new).collect(),
            )),
        }
    }

    /// Loads tracks and flattens the result into a plain list.
    pub async fn search_tracks(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<Track>> {
        let mut tracks = match self.load_tracks(query, options.source, options.strict).await? {
            SearchResult::Tracks(tracks) => tracks,
            SearchResult::Playlist(playlist) => {
                if options.flatten_playlists {
                    playlist.into_tracks()
                } else {
                    playlist
                        .selected_track()
                        .or_else(|| playlist.first())
                        .cloned()
                        .into_iter()
                        .collect()
                }
            }
        };
        if let Some(limit) = options.limit {
            tracks.truncate(limit);
        }
        Ok(tracks)
    }

    /// Convenience wrapper returning the single best match, or `None`
    /// when the query produced nothing.
    pub async fn search_track(
        &self,
        query: &str,
        source: Option<Source>,
    ) -> Result<Option<Track>> {
        match self.load_tracks(query, source, false).await {
            Ok(SearchResult::Tracks(tracks)) => Ok(tracks.into_iter().next()),
            Ok(SearchResult::Playlist(playlist)) => Ok(playlist
                .selected_track()
                .or_else(|| playlist.first())
                .cloned()),
            Err(Error::NoMatches { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Decodes a single encoded track id into a full [`Track`].
    pub async fn fetch_track(&self, id: &str) -> Result<Track> {
        let info: TrackInfo = self
            .rest(Method::GET, "decodetrack", &[("track", id)], None)
            .await?;
        Ok(Track::new(TrackPayload {
            track: id.to_string(),
            info,
        }))
    }

    /// Decodes a batch of encoded track ids.
    ///
    /// With `atomic` set, ids are decoded one request at a time and ids
    /// the node does not know are silently skipped; otherwise the whole
    /// batch goes through a single `decodetracks` request and any
    /// unknown id fails the call.
    pub async fn fetch_tracks(&self, ids: &[String], atomic: bool) -> Result<Vec<Track>> {
        if atomic {
            let mut tracks = Vec::with_capacity(ids.len());
            for id in ids {
                match self.fetch_track(id).await {
                    Ok(track) => tracks.push(track),
                    Err(Error::NotFound) => continue,
                    Err(err) => return Err(err),
                }
            }
            return Ok(tracks);
        }

        let body = json!({ "tracks": ids });
        let payloads: Vec<TrackPayload> = self
            .rest(Method::POST, "decodetracks", &[], Some(&body))
            .await?;
        Ok(payloads.into_iter().map(Track::new).collect())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("identifier", &self.inner.identifier)
            .field("host", &self.inner.config.host)
            .field("players", &self.inner.players.len())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::Config(format!("{value:?} is not a valid header value")))
}

/// Queries that look like URLs skip the search-prefix path.
fn is_url(query: &str) -> Result<bool> {
    static URL_PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    let pattern = URL_PATTERN
        .get_or_init(|| Regex::new(r"^https?://\S+$"))
        .as_ref()
        .map_err(|err| Error::Regex(err.clone()))?;
    Ok(pattern.is_match(query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::handshake::server::{
        ErrorResponse, Request as HandshakeRequest, Response as HandshakeResponse,
    };
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn test_node() -> Node {
        Node::new(
            NodeConfig::builder(1)
                .identifier("test")
                .resume(false)
                .build(),
            None,
        )
    }

    fn local_config(port: u16) -> NodeConfig {
        NodeConfig::builder(1)
            .host("127.0.0.1")
            .port(port)
            .resume(false)
            .build()
    }

    /// Minimal REST endpoint: 404 on `decodetrack`, 500 on `decodetracks`.
    async fn spawn_rest_stub() -> anyhow::Result<std::net::SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = 0;
                    loop {
                        match stream.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => read += n,
                        }
                        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") || read == buf.len()
                        {
                            break;
                        }
                    }
                    let request = String::from_utf8_lossy(&buf[..read]);
                    let status = if request.starts_with("GET /decodetrack?") {
                        "404 Not Found"
                    } else if request.starts_with("POST /decodetracks") {
                        "500 Internal Server Error"
                    } else {
                        "404 Not Found"
                    };
                    let response = format!(
                        "HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        });
        Ok(addr)
    }

    #[test]
    fn test_identifier_uses_config_or_random() {
        assert_eq!(test_node().identifier(), "test");

        let anonymous = Node::new(NodeConfig::builder(1).build(), None);
        assert_eq!(anonymous.identifier().len(), 16);
    }

    #[test]
    fn test_player_created_on_first_use() {
        let node = test_node();
        assert!(matches!(
            node.get_player(1),
            Err(Error::PlayerNotFound(1))
        ));

        let player = node.player(1);
        assert_eq!(player.guild_id(), 1);
        assert_eq!(node.player_count(), 1);

        // Second lookup reuses the existing player instead of making one.
        node.player(1);
        assert_eq!(node.player_count(), 1);
        assert_eq!(node.get_player(1).unwrap().guild_id(), player.guild_id());
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let node = test_node();
        let err = node
            .send(OutgoingMessage::Stop {
                guild_id: "1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeNotConnected { .. }));
    }

    #[tokio::test]
    async fn test_spotify_search_unsupported() {
        let node = test_node();
        let err = node
            .load_tracks("never gonna give you up", Some(Source::Spotify), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_stats_absent_before_first_frame() {
        assert!(test_node().stats().is_none());
    }

    #[test]
    fn test_url_detection() {
        assert!(is_url("https://youtu.be/dQw4w9WgXcQ").unwrap());
        assert!(is_url("http://example.com/track?x=1").unwrap());
        assert!(!is_url("never gonna give you up").unwrap());
        assert!(!is_url("https:// broken").unwrap());
    }

    #[tokio::test]
    async fn test_atomic_fetch_skips_unknown_ids() -> anyhow::Result<()> {
        let addr = spawn_rest_stub().await?;
        let node = Node::new(local_config(addr.port()), None);
        let ids = vec!["aaa".to_string(), "bbb".to_string()];

        // Every id is unknown to the node; atomic mode skips them all
        // one by one instead of failing the batch.
        let tracks = node.fetch_tracks(&ids, true).await?;
        assert!(tracks.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_bulk_fetch_uses_single_request() -> anyhow::Result<()> {
        let addr = spawn_rest_stub().await?;
        let node = Node::new(local_config(addr.port()), None);
        let ids = vec!["aaa".to_string()];

        // Non-atomic mode goes through the batch endpoint, so its error
        // surfaces directly.
        let err = node.fetch_tracks(&ids, false).await.unwrap_err();
        assert!(matches!(err, Error::Http { status: 500 }));
        Ok(())
    }

    #[tokio::test]
    async fn test_handshake_rejection_maps_to_authorization_failure() -> anyhow::Result<()> {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let reject = |_request: &HandshakeRequest,
                              _response: HandshakeResponse|
                 -> std::result::Result<HandshakeResponse, ErrorResponse> {
                    let response = tungstenite::http::Response::builder()
                        .status(tungstenite::http::StatusCode::UNAUTHORIZED)
                        .body(None)
                        .unwrap();
                    Err(response)
                };
                let _ = tokio_tungstenite::accept_hdr_async(stream, reject).await;
            }
        });

        let node = Node::new(local_config(addr.port()), None);
        let err = node.connect().await.unwrap_err();
        assert!(matches!(err, Error::AuthorizationFailure { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_internal_error_close_stops_the_session() -> anyhow::Result<()> {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return false;
            };
            let Ok(mut ws) = accept_async(stream).await else {
                return false;
            };
            let frame = CloseFrame {
                code: CloseCode::Error,
                reason: "internal error".into(),
            };
            if ws.send(Message::Close(Some(frame))).await.is_err() {
                return false;
            }
            // A reconnect would show up as another TCP connection; the
            // window outlasts the first backoff delay.
            tokio::time::timeout(Duration::from_secs(5), listener.accept())
                .await
                .is_err()
        });

        let node = Node::new(local_config(addr.port()), None);
        node.connect().await?;

        assert!(server.await?, "a reconnect was attempted after close 1011");
        assert!(!node.is_connected());
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_key_configured_after_handshake() -> anyhow::Result<()> {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (first_tx, first_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = accept_async(stream).await else {
                return;
            };
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let _ = first_tx.send(text.as_str().to_string());
                    break;
                }
            }
        });

        let config = NodeConfig::builder(1)
            .host("127.0.0.1")
            .port(addr.port())
            .resume(true)
            .build();
        let node = Node::new(config, None);
        node.connect().await?;

        let first = tokio::time::timeout(Duration::from_secs(5), first_rx).await??;
        let value: Value = serde_json::from_str(&first)?;
        assert_eq!(value["op"], "configureResuming");
        assert_eq!(value["timeout"], 60);
        assert!(value["key"].is_string());
        Ok(())
    }

    #[tokio::test]
    async fn test_disconnect_sends_close_frame() -> anyhow::Result<()> {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return false;
            };
            let Ok(mut ws) = accept_async(stream).await else {
                return false;
            };
            while let Some(message) = ws.next().await {
                match message {
                    Ok(Message::Close(_)) => return true,
                    Ok(_) => continue,
                    Err(_) => return false,
                }
            }
            false
        });

        let node = Node::new(local_config(addr.port()), None);
        node.connect().await?;
        node.disconnect();

        let closed = tokio::time::timeout(Duration::from_secs(5), server).await??;
        assert!(closed, "no close frame reached the node");
        assert!(!node.is_connected());
        Ok(())
    }
}
