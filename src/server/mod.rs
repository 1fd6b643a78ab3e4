//! Minimal reference server: TCP acceptor, per-connection read loop, and the
//! nickname/channel registries the session core needs as collaborators.
//!
//! Each accepted connection gets a [`Session`] and a dedicated reader task.
//! Any task may write to any session; [`Session::send`] keeps concurrent
//! writers from interleaving.

mod dispatch;

use anyhow::{Context, Result};
use irc::proto::{Command, Message, Prefix, Response};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::channel::{channel_key, MemoryChannel};
use crate::config::ServerConfig;
use crate::error::TransportError;
use crate::session::Session;

pub struct Server {
    config: ServerConfig,
    /// Registered nicknames, keyed by identity key.
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    /// Live channels, keyed by case-folded name. Empty channels are dropped.
    channels: RwLock<HashMap<String, Arc<MemoryChannel>>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.listen))?;
        info!(listen = %self.config.listen, name = %self.config.name, "listening");
        self.serve(listener).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener
                .accept()
                .await
                .context("Failed to accept connection")?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, addr).await {
                    warn!(%addr, error = %e, "connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let session = Arc::new(Session::connect(stream).context("Failed to set up transport")?);
        session.set_host(addr.ip().to_string());
        info!(%addr, "client connected");
        self.run_session(session).await;
        info!(%addr, "client disconnected");
        Ok(())
    }

    /// Read loop for one session. Returns once the client quits or the
    /// connection fails; the session has been torn down by then.
    pub async fn run_session(&self, session: Arc<Session>) {
        let reason = loop {
            let message = match session.receive().await {
                Ok(message) => message,
                Err(TransportError::Closed) => break "Connection closed".to_string(),
                Err(e) => {
                    warn!(session = %session, error = %e, "read failed");
                    break format!("Read error: {}", e);
                }
            };
            match self.dispatch(&session, message).await {
                Ok(dispatch::Flow::Continue) => {}
                Ok(dispatch::Flow::Quit(reason)) => break reason,
                Err(e) => {
                    warn!(session = %session, error = %e, "write failed");
                    break format!("Write error: {}", e);
                }
            }
        };
        self.disconnect(&session, &reason).await;
    }

    /// Announce the quit to everyone who can see the session, then drop it
    /// from every channel and from the nickname registry.
    async fn disconnect(&self, session: &Arc<Session>, reason: &str) {
        if session.is_registered() {
            let quit = self.from_session(session, Command::QUIT(Some(reason.to_string())));
            self.deliver(&session.visible_to(), &quit).await;
        }
        for channel in session.part_all() {
            self.leave_channel(session, channel.name());
        }
        let key = session.identity_key();
        let mut sessions = self.sessions.write();
        if sessions.get(&key).is_some_and(|s| Arc::ptr_eq(s, session)) {
            sessions.remove(&key);
        }
        debug!(session = %session, reason, "session torn down");
    }

    // --- registries ---

    fn find_session(&self, nick: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(&nick.to_lowercase()).cloned()
    }

    /// Like [`find_session`](Self::find_session), but only sessions that have
    /// completed registration can be addressed.
    fn find_registered(&self, nick: &str) -> Option<Arc<Session>> {
        self.find_session(nick).filter(|s| s.is_registered())
    }

    fn find_channel(&self, name: &str) -> Option<Arc<MemoryChannel>> {
        self.channels.read().get(&channel_key(name)).cloned()
    }

    /// Add `session` to the named channel, creating it if needed.
    ///
    /// Lookup and insertion happen under one registry lock, the same one
    /// [`leave_channel`](Self::leave_channel) takes before dropping an empty
    /// channel, so a joiner can never land in a channel that was just retired.
    /// Returns `None` if the session was already a member.
    fn enter_channel(&self, session: &Arc<Session>, name: &str) -> Option<Arc<MemoryChannel>> {
        let mut channels = self.channels.write();
        let channel = channels
            .entry(channel_key(name))
            .or_insert_with(|| Arc::new(MemoryChannel::new(name)));
        if !channel.add(session) {
            return None;
        }
        session.join(channel.clone());
        Some(Arc::clone(channel))
    }

    /// Remove `session` from the registry's copy of the channel, dropping the
    /// channel once nobody is left in it.
    fn leave_channel(&self, session: &Arc<Session>, name: &str) {
        let key = channel_key(name);
        let mut channels = self.channels.write();
        if let Some(channel) = channels.get(&key) {
            channel.remove(session);
            if channel.is_empty() {
                channels.remove(&key);
            }
        }
    }

    /// Claim `nick` for `session`. Fails if another session holds it.
    fn claim_nickname(&self, session: &Arc<Session>, nick: &str) -> bool {
        let new_key = nick.to_lowercase();
        let mut sessions = self.sessions.write();
        if let Some(holder) = sessions.get(&new_key) {
            if !Arc::ptr_eq(holder, session) {
                return false;
            }
        }
        let old_key = session.identity_key();
        if sessions.get(&old_key).is_some_and(|s| Arc::ptr_eq(s, session)) {
            sessions.remove(&old_key);
        }
        session.set_nickname(nick);
        sessions.insert(new_key, Arc::clone(session));
        true
    }

    // --- message construction and delivery ---

    fn from_session(&self, session: &Session, command: Command) -> Message {
        Message {
            tags: None,
            prefix: Some(session.prefix()),
            command,
        }
    }

    fn numeric(&self, session: &Session, response: Response, args: &[&str]) -> Message {
        let nick = session.nickname();
        let target = if nick.is_empty() { "*".to_string() } else { nick };
        let mut params = vec![target];
        params.extend(args.iter().map(|a| a.to_string()));
        Message {
            tags: None,
            prefix: Some(Prefix::ServerName(self.config.name.clone())),
            command: Command::Response(response, params),
        }
    }

    /// Fan a message out to all recipients at once, each write bounded by the
    /// configured send timeout. Failures are logged, not returned; the
    /// recipients' own read loops notice broken connections.
    async fn deliver(&self, recipients: &[Arc<Session>], message: &Message) {
        let limit = Duration::from_millis(self.config.send_timeout_ms);
        let sends = recipients.iter().map(|recipient| async move {
            match tokio::time::timeout(limit, recipient.send(std::slice::from_ref(message))).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(recipient = %recipient, error = %e, "delivery failed"),
                Err(_) => warn!(recipient = %recipient, "delivery timed out"),
            }
        });
        futures::future::join_all(sends).await;
    }
}
