//! Consumer: per-topic listening state, backed by one long-lived pull task
//! per topic that tails the broker's push worker.

use crate::ci_manager::CiManager;
use crate::events::{EventBus, EventTag, UserEvent};
use dashmap::DashMap;
use log::{debug, warn};
use postmesh_codec::{read_packet, read_post_count, read_post_info, write_message, KEEP_ALIVE_POST_COUNT};
use postmesh_common::{Post, ProfileStore, TopicToken, FETCH_ALL_SENTINEL};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

/// One listened-to topic's client-side state: the resume pointer, the
/// cancellation handle for its pull task, and the posts received since the
/// last `pull`. `pointer` is shared with [`Consumer::pointers`] so the
/// resume cursor survives past `stop_listening` removing this state.
struct ListenState {
    pointer: Arc<AtomicI64>,
    cancel: CancellationToken,
    buffered: AsyncMutex<Vec<Post>>,
}

pub struct Consumer {
    ci_manager: Arc<CiManager>,
    events: EventBus,
    profile: Arc<dyn ProfileStore>,
    topics: DashMap<String, Arc<ListenState>>,
    /// Last-seen post id per topic, independent of whether a listen task is
    /// currently running -- seeded from the profile store on load and
    /// updated as posts are drained, so a stopped-then-resumed listen (or a
    /// process restart) picks up from the topic's last seen id.
    pointers: DashMap<String, Arc<AtomicI64>>,
}

impl Consumer {
    pub fn new(ci_manager: Arc<CiManager>, events: EventBus, profile: Arc<dyn ProfileStore>) -> Self {
        Self { ci_manager, events, profile, topics: DashMap::new(), pointers: DashMap::new() }
    }

    fn pointer_handle(&self, name: &str, initial: i64) -> Arc<AtomicI64> {
        self.pointers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicI64::new(initial)))
            .clone()
    }

    /// Records `id` as the last seen post for `name` if it is newer than
    /// what's already known. Used to seed resume pointers from a loaded
    /// profile's previously-persisted posts.
    pub fn seed_last_seen_id(&self, name: &str, id: i64) {
        match self.pointers.get(name) {
            Some(existing) => {
                if id > existing.load(Ordering::SeqCst) {
                    existing.store(id, Ordering::SeqCst);
                }
            }
            None => {
                self.pointers.insert(name.to_string(), Arc::new(AtomicI64::new(id)));
            }
        }
    }

    /// Starts listening to `name` from `last_seen_id` (the value loaded from
    /// the profile store, or [`FETCH_ALL_SENTINEL`] for a brand-new topic).
    /// Fires `TOPIC_LISTENED` once the broker has acknowledged the
    /// INITIALISE_CONSUMER request.
    pub fn listen_for_new_topic(self: &Arc<Self>, name: impl Into<String>, last_seen_id: i64) {
        let name = name.into();
        let this = self.clone();
        tokio::spawn(async move {
            let pointer = this.pointer_handle(&name, last_seen_id);
            let state = Arc::new(ListenState {
                pointer,
                cancel: CancellationToken::new(),
                buffered: AsyncMutex::new(Vec::new()),
            });

            match this.open_stream(&name, last_seen_id).await {
                Ok(stream) => {
                    this.topics.insert(name.clone(), state.clone());
                    this.events.emit(UserEvent::ok(EventTag::TopicListened, name.clone()));
                    this.run_pull_task(name, state, stream).await;
                }
                Err(e) => {
                    warn!("failed to listen on {name}: {e}");
                    this.events
                        .emit(UserEvent::failed(EventTag::TopicListened, name, e.to_string()));
                }
            }
        });
    }

    async fn open_stream(&self, name: &str, last_seen_id: i64) -> postmesh_common::Result<TcpStream> {
        let ci = self.ci_manager.resolve(name).await?;
        let mut stream = TcpStream::connect(ci.socket_addr()).await?;
        let token = TopicToken { name: name.to_string(), last_seen_id };
        write_message(&mut stream, &postmesh_codec::Message::initialise_consumer(token)).await?;
        if !postmesh_codec::read_bool(&mut stream).await? {
            return Err(postmesh_common::Error::NoSuchTopic(name.to_string()));
        }
        Ok(stream)
    }

    /// Reads the backfill-then-keep-alive stream written by
    /// `postmesh_broker`'s push worker, reassembling each post and buffering
    /// it for the next `pull`. Fires `MESSAGE_RECEIVED` per post. Distinguishes
    /// a server-initiated close (EOF, `SERVER_TOPIC_DELETED`) from a
    /// client-initiated `stop_listening` (cancellation, `TOPIC_LISTEN_STOPPED`).
    async fn run_pull_task(&self, name: String, state: Arc<ListenState>, mut stream: TcpStream) {
        let result = tokio::select! {
            _ = state.cancel.cancelled() => PullOutcome::Cancelled,
            r = Self::drain_stream(&mut stream, &state, &name, &self.events, &self.profile) => r,
        };

        self.topics.remove(&name);
        match result {
            PullOutcome::Cancelled => {
                self.events.emit(UserEvent::ok(EventTag::TopicListenStopped, name));
            }
            PullOutcome::Eof => {
                debug!("stream for {name} closed by broker (topic deleted)");
                self.events.emit(UserEvent::ok(EventTag::ServerTopicDeleted, name));
            }
            PullOutcome::Error(e) => {
                warn!("pull task for {name} failed: {e}");
                self.events
                    .emit(UserEvent::failed(EventTag::MessageReceived, name, e.to_string()));
            }
        }
    }

    async fn drain_stream(
        stream: &mut TcpStream,
        state: &ListenState,
        name: &str,
        events: &EventBus,
        profile: &Arc<dyn ProfileStore>,
    ) -> PullOutcome {
        loop {
            let count = match read_post_count(stream).await {
                Ok(c) => c,
                Err(e) => return err_or_eof(e),
            };

            if count == KEEP_ALIVE_POST_COUNT {
                // Tailing phase: records stream without further count
                // prefixes until the broker appends something new.
                loop {
                    match Self::read_one_post(stream).await {
                        Ok(post) => Self::buffer(state, post, name, events, profile).await,
                        Err(e) => return err_or_eof(e),
                    }
                }
            }

            for _ in 0..count {
                match Self::read_one_post(stream).await {
                    Ok(post) => Self::buffer(state, post, name, events, profile).await,
                    Err(e) => return err_or_eof(e),
                }
            }
        }
    }

    async fn read_one_post(stream: &mut TcpStream) -> postmesh_common::Result<Post> {
        let info = read_post_info(stream).await?;
        let mut packets = Vec::new();
        loop {
            let packet = read_packet(stream).await?;
            let is_final = packet.is_final;
            packets.push(packet);
            if is_final {
                break;
            }
        }
        Ok(Post::from_packets(info, &packets))
    }

    async fn buffer(state: &ListenState, post: Post, name: &str, events: &EventBus, profile: &Arc<dyn ProfileStore>) {
        state.pointer.store(post.info.id, Ordering::SeqCst);
        if let Err(e) = profile.save_post(&post, name).await {
            warn!("failed to persist received post for {name}: {e}");
        }
        events.emit(UserEvent::ok(EventTag::MessageReceived, name.to_string()));
        state.buffered.lock().await.push(post);
    }

    /// Returns every post buffered since the previous `pull`, advancing the
    /// pointer to the latest. Draining does not close the stream.
    pub async fn pull(&self, name: &str) -> postmesh_common::Result<Vec<Post>> {
        let state = self
            .topics
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| postmesh_common::Error::NoSuchTopic(name.to_string()))?;
        let mut buffered = state.buffered.lock().await;
        Ok(std::mem::take(&mut *buffered))
    }

    /// Closes the recorded streaming socket for `name` (a pure-local
    /// operation) and fires `TOPIC_LISTEN_STOPPED` once the pull task
    /// observes the cancellation.
    pub fn stop_listening(&self, name: &str) {
        if let Some(entry) = self.topics.get(name) {
            entry.value().cancel.cancel();
        }
    }

    pub fn last_seen_id(&self, name: &str) -> i64 {
        self.pointers
            .get(name)
            .map(|entry| entry.value().load(Ordering::SeqCst))
            .unwrap_or(FETCH_ALL_SENTINEL)
    }
}

enum PullOutcome {
    Cancelled,
    Eof,
    Error(postmesh_common::Error),
}

fn err_or_eof(e: postmesh_common::Error) -> PullOutcome {
    if let postmesh_common::Error::Io(ref io_err) = e {
        if io_err.kind() == std::io::ErrorKind::UnexpectedEof {
            return PullOutcome::Eof;
        }
    }
    PullOutcome::Error(e)
}

