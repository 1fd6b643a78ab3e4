//! Connected participant state.
//!
//! A [`Session`] owns one transport, a handful of identity fields filled in
//! during registration, and the set of channels it currently belongs to.
//! Every accessor takes the session's state lock itself, so callers never
//! have to remember to guard a read against a concurrent rename or join.
//!
//! Traffic goes through [`Session::send`] and [`Session::receive`], which log
//! each message at debug level before handing it to the transport.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use irc::proto::{Message, Prefix};
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::debug;

use crate::channel::{channel_key, Channel};
use crate::error::TransportResult;
use crate::transport::{NetTransport, Transport};

/// Host placeholder used until the connection's host is known.
pub const UNRESOLVED_HOST: &str = "*";

struct SessionState {
    nickname: String,
    username: String,
    realname: String,
    host: String,
    /// Keyed by case-folded channel name.
    channels: HashMap<String, Arc<dyn Channel>>,
}

/// Server-side state for one connected participant.
pub struct Session {
    transport: Box<dyn Transport>,
    /// Held for a whole `send` so multi-message writes never interleave.
    send_lock: Mutex<()>,
    state: RwLock<SessionState>,
}

impl Session {
    /// Create a session over an already established transport.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self {
            transport: Box::new(transport),
            send_lock: Mutex::new(()),
            state: RwLock::new(SessionState {
                nickname: String::new(),
                username: String::new(),
                realname: String::new(),
                host: UNRESOLVED_HOST.to_string(),
                channels: HashMap::new(),
            }),
        }
    }

    /// Create a session speaking line-framed IRC over a raw byte stream.
    pub fn connect<S>(stream: S) -> TransportResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Ok(Self::new(NetTransport::new(stream)?))
    }

    // --- identity ---

    /// Canonical comparison key: the nickname, lowercased, as of right now.
    pub fn identity_key(&self) -> String {
        self.state.read().nickname.to_lowercase()
    }

    pub fn nickname(&self) -> String {
        self.state.read().nickname.clone()
    }

    pub fn username(&self) -> String {
        self.state.read().username.clone()
    }

    pub fn realname(&self) -> String {
        self.state.read().realname.clone()
    }

    pub fn host(&self) -> String {
        self.state.read().host.clone()
    }

    pub fn set_nickname(&self, nickname: impl Into<String>) {
        self.state.write().nickname = nickname.into();
    }

    pub fn set_username(&self, username: impl Into<String>) {
        self.state.write().username = username.into();
    }

    pub fn set_realname(&self, realname: impl Into<String>) {
        self.state.write().realname = realname.into();
    }

    pub fn set_host(&self, host: impl Into<String>) {
        self.state.write().host = host.into();
    }

    /// Both NICK and USER have been seen.
    pub fn is_registered(&self) -> bool {
        let state = self.state.read();
        !state.nickname.is_empty() && !state.username.is_empty()
    }

    /// Sender identity for stamping outgoing messages.
    pub fn prefix(&self) -> Prefix {
        let state = self.state.read();
        Prefix::Nickname(
            state.nickname.clone(),
            state.username.clone(),
            state.host.clone(),
        )
    }

    // --- channel membership ---

    /// Record membership in `channel`. Returns `false` if already a member.
    pub fn join(&self, channel: Arc<dyn Channel>) -> bool {
        let key = channel_key(channel.name());
        let mut state = self.state.write();
        if state.channels.contains_key(&key) {
            return false;
        }
        state.channels.insert(key, channel);
        true
    }

    /// Drop membership of the named channel, returning it if present.
    pub fn part(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.state.write().channels.remove(&channel_key(name))
    }

    /// Drop every membership at once. Used on disconnect.
    pub fn part_all(&self) -> Vec<Arc<dyn Channel>> {
        self.state
            .write()
            .channels
            .drain()
            .map(|(_, channel)| channel)
            .collect()
    }

    pub fn is_member(&self, name: &str) -> bool {
        self.state.read().channels.contains_key(&channel_key(name))
    }

    pub fn channels(&self) -> Vec<Arc<dyn Channel>> {
        self.state.read().channels.values().cloned().collect()
    }

    /// Every other session sharing at least one channel with this one.
    ///
    /// The result is a set: no duplicates, never `self`, in no particular
    /// order. Sessions are told apart by [`identity_key`](Self::identity_key).
    pub fn visible_to(&self) -> Vec<Arc<Session>> {
        // Snapshot under the lock, then release it before calling into channels.
        let (own_key, channels) = {
            let state = self.state.read();
            let channels: Vec<_> = state.channels.values().cloned().collect();
            (state.nickname.to_lowercase(), channels)
        };

        // Over-estimate: shared members and self are counted once per channel.
        let capacity: usize = channels.iter().map(|ch| ch.member_count()).sum();
        if capacity == 0 {
            return Vec::new();
        }

        let mut seen = HashSet::with_capacity(capacity);
        seen.insert(own_key);
        let mut visible = Vec::with_capacity(capacity);
        for channel in &channels {
            for member in channel.members() {
                if seen.insert(member.identity_key()) {
                    visible.push(member);
                }
            }
        }
        visible
    }

    // --- traffic ---

    /// Send `messages` in order, stopping at the first failure.
    ///
    /// Messages already written before a failure stay written. Concurrent
    /// callers are serialized per session.
    pub async fn send(&self, messages: &[Message]) -> TransportResult<()> {
        let _guard = self.send_lock.lock().await;
        for message in messages {
            debug!(session = %self, "-> {}", message.to_string().trim_end());
            self.transport.send(message).await?;
        }
        Ok(())
    }

    /// Receive one message, exactly as the transport produced it.
    pub async fn receive(&self) -> TransportResult<Message> {
        let received = self.transport.receive().await;
        match &received {
            Ok(message) => debug!(session = %self, "<- {}", message.to_string().trim_end()),
            Err(err) => debug!(session = %self, error = %err, "<- receive failed"),
        }
        received
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Session")
            .field("nickname", &state.nickname)
            .field("username", &state.username)
            .field("host", &state.host)
            .field("channels", &state.channels.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use irc::proto::Command;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every attempted send; optionally fails the n-th attempt.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) attempted: Arc<parking_lot::Mutex<Vec<Message>>>,
        fail_on: Option<usize>,
        inbound: parking_lot::Mutex<VecDeque<TransportResult<Message>>>,
    }

    impl RecordingTransport {
        fn failing_on(index: usize) -> Self {
            Self {
                fail_on: Some(index),
                ..Self::default()
            }
        }

        fn with_inbound(inbound: Vec<TransportResult<Message>>) -> Self {
            Self {
                inbound: parking_lot::Mutex::new(inbound.into()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, message: &Message) -> TransportResult<()> {
            let index = {
                let mut attempted = self.attempted.lock();
                attempted.push(message.clone());
                attempted.len() - 1
            };
            tokio::task::yield_now().await;
            if self.fail_on == Some(index) {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    format!("write {index} failed"),
                )));
            }
            Ok(())
        }

        async fn receive(&self) -> TransportResult<Message> {
            self.inbound
                .lock()
                .pop_front()
                .unwrap_or(Err(TransportError::Closed))
        }
    }

    /// Fixed member list that counts how often it is enumerated.
    struct CountingChannel {
        name: String,
        members: Vec<Arc<Session>>,
        member_calls: AtomicUsize,
    }

    impl CountingChannel {
        fn new(name: &str, members: Vec<Arc<Session>>) -> Self {
            Self {
                name: name.into(),
                members,
                member_calls: AtomicUsize::new(0),
            }
        }
    }

    impl Channel for CountingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        fn member_count(&self) -> usize {
            self.members.len()
        }

        fn members(&self) -> Vec<Arc<Session>> {
            self.member_calls.fetch_add(1, Ordering::SeqCst);
            self.members.clone()
        }
    }

    fn session(nick: &str) -> Arc<Session> {
        let session = Session::new(RecordingTransport::default());
        session.set_nickname(nick);
        Arc::new(session)
    }

    fn enter(session: &Arc<Session>, channel: &Arc<MemoryChannel>) {
        channel.add(session);
        session.join(channel.clone());
    }

    fn keys(sessions: &[Arc<Session>]) -> Vec<String> {
        let mut keys: Vec<String> = sessions.iter().map(|s| s.identity_key()).collect();
        keys.sort();
        keys
    }

    fn privmsg(text: &str) -> Message {
        Message {
            tags: None,
            prefix: None,
            command: Command::PRIVMSG("#general".into(), text.into()),
        }
    }

    fn text_of(message: &Message) -> String {
        match &message.command {
            Command::PRIVMSG(_, text) => text.clone(),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_new_session_defaults() {
        let session = Session::new(RecordingTransport::default());
        assert_eq!(session.nickname(), "");
        assert_eq!(session.username(), "");
        assert_eq!(session.realname(), "");
        assert_eq!(session.host(), UNRESOLVED_HOST);
        assert!(session.channels().is_empty());
        assert!(!session.is_registered());
    }

    #[test]
    fn test_identity_key_follows_renames() {
        let session = session("Bob");
        assert_eq!(session.identity_key(), "bob");

        session.set_nickname("ROBERT");
        assert_eq!(session.identity_key(), "robert");
        assert_eq!(session.nickname(), "ROBERT");
    }

    #[test]
    fn test_prefix_reflects_current_fields() {
        let session = session("alice");
        session.set_username("al");
        assert_eq!(
            session.prefix(),
            Prefix::Nickname("alice".into(), "al".into(), "*".into())
        );
        assert_eq!(session.to_string(), "alice!al@*");

        session.set_host("10.0.0.7");
        session.set_nickname("alicia");
        assert_eq!(session.to_string(), "alicia!al@10.0.0.7");
    }

    #[test]
    fn test_is_registered_needs_nick_and_user() {
        let session = Session::new(RecordingTransport::default());
        session.set_nickname("alice");
        assert!(!session.is_registered());
        session.set_username("al");
        session.set_realname("Alice Liddell");
        assert!(session.is_registered());
        assert_eq!(session.realname(), "Alice Liddell");
    }

    #[test]
    fn test_join_and_part_membership() {
        let alice = session("alice");
        let general: Arc<dyn Channel> = Arc::new(MemoryChannel::new("#General"));

        assert!(alice.join(general.clone()));
        assert!(!alice.join(general.clone()));
        assert!(alice.is_member("#general"));

        assert!(alice.part("#GENERAL").is_some());
        assert!(alice.part("#general").is_none());
        assert!(!alice.is_member("#general"));
    }

    #[test]
    fn test_part_all_empties_memberships() {
        let alice = session("alice");
        alice.join(Arc::new(MemoryChannel::new("#a")));
        alice.join(Arc::new(MemoryChannel::new("#b")));

        let parted = alice.part_all();
        assert_eq!(parted.len(), 2);
        assert!(alice.channels().is_empty());
        assert!(alice.visible_to().is_empty());
    }

    #[test]
    fn test_visibility_scenario() {
        let alice = session("alice");
        let bob = session("Bob");
        let carol = session("carol");
        let general = Arc::new(MemoryChannel::new("#general"));
        let dev = Arc::new(MemoryChannel::new("#dev"));
        enter(&alice, &general);
        enter(&bob, &general);
        enter(&alice, &dev);
        enter(&carol, &dev);

        assert_eq!(keys(&alice.visible_to()), vec!["bob", "carol"]);
        assert_eq!(keys(&bob.visible_to()), vec!["alice"]);
        assert_eq!(keys(&carol.visible_to()), vec!["alice"]);
        assert_eq!(bob.identity_key(), "bob");
    }

    #[test]
    fn test_visibility_never_includes_self() {
        let alice = session("alice");
        let general = Arc::new(MemoryChannel::new("#general"));
        enter(&alice, &general);

        assert!(alice.visible_to().is_empty());
    }

    #[test]
    fn test_visibility_deduplicates_across_shared_channels() {
        let alice = session("alice");
        let bob = session("bob");
        for name in ["#a", "#b", "#c"] {
            let channel = Arc::new(MemoryChannel::new(name));
            enter(&alice, &channel);
            enter(&bob, &channel);
        }

        let visible = alice.visible_to();
        assert_eq!(visible.len(), 1);
        assert!(Arc::ptr_eq(&visible[0], &bob));
    }

    #[test]
    fn test_visibility_is_symmetric() {
        let sessions: Vec<_> = ["a", "b", "c", "d"].into_iter().map(session).collect();
        let left = Arc::new(MemoryChannel::new("#left"));
        let right = Arc::new(MemoryChannel::new("#right"));
        enter(&sessions[0], &left);
        enter(&sessions[1], &left);
        enter(&sessions[1], &right);
        enter(&sessions[2], &right);

        for a in &sessions {
            for b in &sessions {
                let a_sees_b = keys(&a.visible_to()).contains(&b.identity_key());
                let b_sees_a = keys(&b.visible_to()).contains(&a.identity_key());
                assert_eq!(a_sees_b, b_sees_a, "{a} / {b}");
            }
        }
        assert!(sessions[3].visible_to().is_empty());
    }

    #[test]
    fn test_visibility_dedup_uses_identity_key() {
        // Two session objects with case-variant nicks count as one participant.
        let alice = session("alice");
        let bob = session("bob");
        let bob_again = session("BOB");
        let a = Arc::new(MemoryChannel::new("#a"));
        let b = Arc::new(MemoryChannel::new("#b"));
        enter(&alice, &a);
        enter(&bob, &a);
        enter(&alice, &b);
        enter(&bob_again, &b);

        assert_eq!(keys(&alice.visible_to()), vec!["bob"]);
    }

    #[test]
    fn test_isolated_session_never_enumerates_channels() {
        let alice = session("alice");
        let bob = session("bob");
        let elsewhere = CountingChannel::new("#elsewhere", vec![bob]);

        assert!(alice.visible_to().is_empty());
        assert_eq!(elsewhere.member_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_channels_short_circuit() {
        let alice = session("alice");
        let empty = Arc::new(CountingChannel::new("#empty", Vec::new()));
        alice.join(empty.clone());

        assert!(alice.visible_to().is_empty());
        assert_eq!(empty.member_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_populated_channels_are_enumerated_once() {
        let alice = session("alice");
        let bob = session("bob");
        let counting = Arc::new(CountingChannel::new(
            "#general",
            vec![alice.clone(), bob.clone()],
        ));
        alice.join(counting.clone());

        assert_eq!(keys(&alice.visible_to()), vec!["bob"]);
        assert_eq!(counting.member_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_stops_at_first_failure() {
        let transport = RecordingTransport::failing_on(1);
        let attempted = transport.attempted.clone();
        let session = Session::new(transport);

        let err = session
            .send(&[privmsg("m1"), privmsg("m2"), privmsg("m3")])
            .await
            .unwrap_err();

        match err {
            TransportError::Io(e) => assert_eq!(e.to_string(), "write 1 failed"),
            other => panic!("unexpected error: {other:?}"),
        }
        let texts: Vec<_> = attempted.lock().iter().map(text_of).collect();
        assert_eq!(texts, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_send_nothing_succeeds() {
        let transport = RecordingTransport::default();
        let attempted = transport.attempted.clone();
        let session = Session::new(transport);

        session.send(&[]).await.unwrap();
        assert!(attempted.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_sends_do_not_interleave() {
        let transport = RecordingTransport::default();
        let attempted = transport.attempted.clone();
        let session = Arc::new(Session::new(transport));

        let mut tasks = Vec::new();
        for tag in ["a", "b", "c"] {
            let session = session.clone();
            tasks.push(tokio::spawn(async move {
                let batch: Vec<_> = (1..=3).map(|i| privmsg(&format!("{tag}{i}"))).collect();
                session.send(&batch).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let texts: Vec<_> = attempted.lock().iter().map(text_of).collect();
        assert_eq!(texts.len(), 9);
        for group in texts.chunks(3) {
            let tag = &group[0][..1];
            let expected: Vec<String> = (1..=3).map(|i| format!("{tag}{i}")).collect();
            assert_eq!(group, expected.as_slice());
        }
    }

    #[tokio::test]
    async fn test_receive_passes_through() {
        let ping = Message {
            tags: None,
            prefix: None,
            command: Command::PING("irc.example".into(), None),
        };
        let session = Session::new(RecordingTransport::with_inbound(vec![
            Ok(ping.clone()),
            Err(TransportError::Malformed("garbage".into())),
        ]));

        assert_eq!(session.receive().await.unwrap(), ping);
        match session.receive().await {
            Err(TransportError::Malformed(frame)) => assert_eq!(frame, "garbage"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            session.receive().await,
            Err(TransportError::Closed)
        ));
    }
}
