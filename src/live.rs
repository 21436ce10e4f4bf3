//! Live view of one open conversation.
//!
//! [`LiveChannel`] owns the background work for the selected room: the
//! event stream and the fallback re-fetch timer. Both report through a
//! single channel as [`ChannelUpdate`]s, and [`ConversationView`] applies
//! them on the owning task. Opening another room always tears the previous
//! subscription down first.

use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::client::ApiClient;
use crate::api::events::{SseDecoder, StreamEvent};
use crate::api::models::ChatMessage;
use crate::conversations::conversation_messages;
use crate::identity::{Directory, Identity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    Stream(StreamEvent),
    /// Re-fetched records of the room, replacing whatever is shown.
    Refetch(Vec<ChatMessage>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub room: String,
    pub kind: UpdateKind,
}

/// Messages of the selected conversation, oldest first.
#[derive(Debug, Clone, Default)]
pub struct ConversationView {
    room: String,
    messages: Vec<ChatMessage>,
}

impl ConversationView {
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            messages: Vec::new(),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut [ChatMessage] {
        &mut self.messages
    }

    /// Applies an update and reports whether the view changed. Updates for
    /// any other room are stale and dropped.
    pub fn apply(&mut self, update: ChannelUpdate) -> bool {
        if update.room != self.room {
            log::debug!("dropping stale update for {}", update.room);
            return false;
        }
        match update.kind {
            UpdateKind::Stream(StreamEvent::Initial(snapshot)) => {
                // A late empty snapshot must not wipe what is already shown.
                if snapshot.is_empty() {
                    return false;
                }
                self.replace(snapshot);
                true
            }
            UpdateKind::Stream(StreamEvent::New(msg)) => self.insert(msg),
            UpdateKind::Refetch(list) => {
                self.replace(list);
                true
            }
        }
    }

    /// Adds a locally sent message ahead of the server echo.
    pub fn push_local(&mut self, msg: ChatMessage) -> bool {
        self.insert(msg)
    }

    fn insert(&mut self, msg: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }
        self.messages.push(msg);
        self.sort();
        true
    }

    fn replace(&mut self, list: Vec<ChatMessage>) {
        self.messages = list;
        self.sort();
    }

    fn sort(&mut self) {
        self.messages.sort_by_key(ChatMessage::timestamp);
    }
}

struct Subscription {
    room: String,
    stream: JoinHandle<()>,
    poll: Option<JoinHandle<()>>,
}

impl Subscription {
    fn abort(self) {
        self.stream.abort();
        if let Some(poll) = self.poll {
            poll.abort();
        }
        log::info!("closed live channel for {}", self.room);
    }
}

/// What the re-fetch timer needs to pick the open conversation's records
/// out of the user's full message list.
#[derive(Debug, Clone)]
pub struct PollScope {
    pub identity: Identity,
    pub directory: Directory,
}

/// At most one live subscription at a time.
pub struct LiveChannel {
    client: ApiClient,
    scope: PollScope,
    poll_interval: Option<Duration>,
    updates: mpsc::UnboundedSender<ChannelUpdate>,
    active: Option<Subscription>,
}

impl LiveChannel {
    /// `poll_secs == 0` disables the re-fetch timer.
    pub fn new(client: ApiClient, scope: PollScope, poll_secs: u64) -> (Self, mpsc::UnboundedReceiver<ChannelUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Self {
            client,
            scope,
            poll_interval: (poll_secs > 0).then(|| Duration::from_secs(poll_secs)),
            updates: tx,
            active: None,
        };
        (channel, rx)
    }

    pub fn room(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.room.as_str())
    }

    pub fn open(&mut self, room: &str) {
        self.close();
        log::info!("opening live channel for {room}");
        let stream = tokio::spawn(run_stream(self.client.clone(), room.to_string(), self.updates.clone()));
        let poll = self
            .poll_interval
            .map(|every| {
                tokio::spawn(run_poll(
                    self.client.clone(),
                    self.scope.clone(),
                    room.to_string(),
                    every,
                    self.updates.clone(),
                ))
            });
        self.active = Some(Subscription {
            room: room.to_string(),
            stream,
            poll,
        });
    }

    pub fn close(&mut self) {
        if let Some(sub) = self.active.take() {
            sub.abort();
        }
    }

    #[cfg(test)]
    fn task_handles(&self) -> Vec<tokio::task::AbortHandle> {
        self.active
            .iter()
            .flat_map(|s| std::iter::once(&s.stream).chain(s.poll.as_ref()))
            .map(JoinHandle::abort_handle)
            .collect()
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_stream(client: ApiClient, room: String, tx: mpsc::UnboundedSender<ChannelUpdate>) {
    let resp = match client.open_stream(&room).await {
        Ok(resp) => resp,
        Err(e) => {
            log::warn!("stream for {room} failed to open: {e}");
            return;
        }
    };
    if forward_events(&room, resp.bytes_stream(), &tx).await {
        log::info!("stream for {room} ended");
    }
}

/// Decodes an event-stream body into updates for `room`. Returns false if
/// the body failed or the receiver went away.
async fn forward_events<S, B, E>(room: &str, body: S, tx: &mpsc::UnboundedSender<ChannelUpdate>) -> bool
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = SseDecoder::new();
    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("stream for {room} interrupted: {e}");
                return false;
            }
        };
        for frame in decoder.push(bytes.as_ref()) {
            let Some(event) = StreamEvent::from_frame(&frame) else {
                continue;
            };
            let update = ChannelUpdate {
                room: room.to_string(),
                kind: UpdateKind::Stream(event),
            };
            if tx.send(update).is_err() {
                return false;
            }
        }
    }
    true
}

async fn run_poll(
    client: ApiClient,
    scope: PollScope,
    room: String,
    every: Duration,
    tx: mpsc::UnboundedSender<ChannelUpdate>,
) {
    let mut ticker = tokio::time::interval(every);
    // The first tick fires immediately; the caller has just fetched.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let all = client.fetch_my_messages(&scope.identity).await;
        let list = conversation_messages(&all, &scope.identity, &scope.directory, &room);
        // Failed queries come back empty; keep showing what we have.
        if list.is_empty() {
            log::debug!("re-fetch of {room} returned nothing");
            continue;
        }
        let update = ChannelUpdate {
            room: room.clone(),
            kind: UpdateKind::Refetch(list),
        };
        if tx.send(update).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Session, Settings};

    fn msg(id: &str, at: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            created_date: at.into(),
            ..Default::default()
        }
    }

    fn update(room: &str, kind: UpdateKind) -> ChannelUpdate {
        ChannelUpdate { room: room.into(), kind }
    }

    fn ids(view: &ConversationView) -> Vec<&str> {
        view.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn new_events_dedupe_and_sort() {
        let mut view = ConversationView::new("r");
        assert!(view.apply(update("r", UpdateKind::Stream(StreamEvent::New(msg("2", "2024-01-01T00:00:02Z"))))));
        assert!(view.apply(update("r", UpdateKind::Stream(StreamEvent::New(msg("1", "2024-01-01T00:00:01Z"))))));
        assert!(!view.apply(update("r", UpdateKind::Stream(StreamEvent::New(msg("2", "2024-01-01T00:00:02Z"))))));
        assert_eq!(ids(&view), ["1", "2"]);
    }

    #[test]
    fn empty_snapshot_keeps_local_state() {
        let mut view = ConversationView::new("r");
        view.push_local(msg("local", "2024-01-01T00:00:01Z"));
        assert!(!view.apply(update("r", UpdateKind::Stream(StreamEvent::Initial(vec![])))));
        assert_eq!(ids(&view), ["local"]);

        let snapshot = vec![msg("b", "2024-01-01T00:00:05Z"), msg("a", "2024-01-01T00:00:03Z")];
        assert!(view.apply(update("r", UpdateKind::Stream(StreamEvent::Initial(snapshot)))));
        assert_eq!(ids(&view), ["a", "b"]);
    }

    #[test]
    fn refetch_is_last_writer_wins() {
        let mut view = ConversationView::new("r");
        view.push_local(msg("x", ""));
        assert!(view.apply(update("r", UpdateKind::Refetch(vec![msg("y", "")]))));
        assert_eq!(ids(&view), ["y"]);
    }

    #[test]
    fn stale_room_updates_are_ignored() {
        let mut view = ConversationView::new("current");
        assert!(!view.apply(update("previous", UpdateKind::Refetch(vec![msg("old", "")]))));
        assert!(view.messages().is_empty());
    }

    /// A server that accepts connections and never answers, so stream tasks
    /// stay pending until aborted.
    async fn silent_channel() -> (LiveChannel, mpsc::UnboundedReceiver<ChannelUpdate>, tokio::net::TcpListener) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let settings = Settings {
            base_url: format!("http://{}", listener.local_addr().unwrap()),
            email: "a@x.com".into(),
            ..Default::default()
        };
        let client = ApiClient::new(&Session::from_settings(&settings).unwrap()).unwrap();
        let scope = PollScope {
            identity: Identity::new("a@x.com", None),
            directory: Directory::default(),
        };
        let (channel, rx) = LiveChannel::new(client, scope, 60);
        (channel, rx, listener)
    }

    async fn all_finished(handles: &[tokio::task::AbortHandle]) -> bool {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !handles.iter().all(|h| h.is_finished()) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn opening_a_room_aborts_the_previous_tasks() {
        let (mut channel, mut rx, _server) = silent_channel().await;
        assert_eq!(channel.room(), None);

        channel.open("a@x.com-bob@x.com");
        let first = channel.task_handles();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|h| !h.is_finished()));

        channel.open("a@x.com-carol@x.com");
        assert_eq!(channel.room(), Some("a@x.com-carol@x.com"));
        assert!(all_finished(&first).await);
        let second = channel.task_handles();
        assert!(second.iter().all(|h| !h.is_finished()));

        channel.close();
        assert_eq!(channel.room(), None);
        assert!(all_finished(&second).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_the_channel_aborts_its_tasks() {
        let (mut channel, _rx, _server) = silent_channel().await;
        channel.open("a@x.com-bob@x.com");
        let handles = channel.task_handles();
        drop(channel);
        assert!(all_finished(&handles).await);
    }

    #[tokio::test]
    async fn decoded_events_feed_the_view() {
        let room = "a@x.com-bob@x.com";
        let chunks: Vec<std::result::Result<&[u8], String>> = vec![
            Ok(&b"event: initial\ndata: [{\"id\":\"2\",\"createdDate\":\"2024-01-01T00:00:02Z\"},"[..]),
            Ok(&b"{\"id\":\"1\",\"createdDate\":\"2024-01-01T00:00:01Z\"}]\n\n"[..]),
            Ok(&b"event: new\ndata: {\"id\":\"3\",\"createdDate\":\"2024-01-01T00:00:03Z\"}\n\n"[..]),
            Ok(&b"event: new\ndata: {\"id\":\"2\",\"createdDate\":\"2024-01-01T00:00:02Z\"}\n\n"[..]),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(forward_events(room, futures_util::stream::iter(chunks), &tx).await);

        let mut view = ConversationView::new(room);
        let mut changed = Vec::new();
        while let Ok(update) = rx.try_recv() {
            changed.push(view.apply(update));
        }
        assert_eq!(changed, [true, true, false]);
        assert_eq!(ids(&view), ["1", "2", "3"]);
    }

    #[tokio::test]
    async fn stream_error_stops_forwarding() {
        let chunks: Vec<std::result::Result<&[u8], String>> = vec![
            Err("reset".into()),
            Ok(&b"event: new\ndata: {\"id\":\"9\"}\n\n"[..]),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(!forward_events("r", futures_util::stream::iter(chunks), &tx).await);
        assert!(rx.try_recv().is_err());
    }
}
