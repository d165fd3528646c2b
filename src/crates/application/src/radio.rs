use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use log::{error, info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::error::AppError;
use domain::radio::{QueueEntry, QueueRepository, SignedUrlProvider};
use domain::song::SongRepository;
use domain::user::{User, UserRepository};
use domain::value::{QueueEntryId, SongId, UserId};
use model::radio::{QueueState, RadioEvent};
use model::track::{Track, TrackAdder};

pub type ListenerId = u64;
pub type ListenerSender = UnboundedSender<RadioEvent>;

/// In-memory queue slot: the wire-facing track plus the song reference the
/// refresh cycle needs to re-resolve the signed URL.
#[derive(Debug, Clone)]
struct QueuedTrack {
    song_id: SongId,
    track: Track,
}

/// Published runtime state. Written only while holding the engine's
/// operation lock; read lock-free-ish for snapshots.
#[derive(Default)]
struct PublishedState {
    queue: Vec<QueuedTrack>,
    is_radio_active: bool,
}

/// Owned handle for the pending playback-advance timer. `epoch` is bumped on
/// every arm and cancel; a timer task whose epoch no longer matches the
/// stored one raced with a skip or toggle and must not advance.
#[derive(Default)]
struct PlaybackTimer {
    handle: Option<JoinHandle<()>>,
    epoch: u64,
}

/// The live radio queue engine.
///
/// Single instance per process, constructed at startup and shared by the API
/// layer and the websocket transport. All mutating operations, the playback
/// timer callback and the URL-refresh tick are serialized through `op_lock`;
/// the listener registry is a separate, finer-grained structure so that
/// broadcasting never blocks new registrations.
pub struct RadioEngine {
    songs: Arc<dyn SongRepository>,
    users: Arc<dyn UserRepository>,
    queue_store: Arc<dyn QueueRepository>,
    signer: Arc<dyn SignedUrlProvider>,
    op_lock: tokio::sync::Mutex<()>,
    state: parking_lot::RwLock<PublishedState>,
    timer: parking_lot::Mutex<PlaybackTimer>,
    listeners: DashMap<ListenerId, ListenerSender>,
    next_listener_id: AtomicU64,
    /// Highest position handed out by this process. Positions are never
    /// reused, so the next one is max(persisted max, high water) + 1.
    high_water_position: AtomicI32,
    refresh_interval: Duration,
}

impl RadioEngine {
    pub fn new(
        songs: Arc<dyn SongRepository>,
        users: Arc<dyn UserRepository>,
        queue_store: Arc<dyn QueueRepository>,
        signer: Arc<dyn SignedUrlProvider>,
        refresh_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            songs,
            users,
            queue_store,
            signer,
            op_lock: tokio::sync::Mutex::new(()),
            state: parking_lot::RwLock::new(PublishedState::default()),
            timer: parking_lot::Mutex::new(PlaybackTimer::default()),
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
            high_water_position: AtomicI32::new(0),
            refresh_interval,
        })
    }

    /// One-time bootstrap: project the persisted queue into memory. A failure
    /// here is logged and leaves the queue empty; a background subsystem's
    /// partial failure must not be fatal to process startup.
    pub async fn bootstrap(&self) {
        let _guard = self.op_lock.lock().await;
        match self.load_persisted_queue().await {
            Ok(tracks) => {
                info!("radio queue bootstrapped with {} tracks", tracks.len());
                self.state.write().queue = tracks;
            }
            Err(e) => {
                error!("radio queue bootstrap failed, starting empty: {}", e);
            }
        }
        match self.queue_store.max_position().await {
            Ok(max) => {
                self.high_water_position
                    .store(max.unwrap_or(0), Ordering::SeqCst);
            }
            Err(e) => warn!("could not read max queue position: {}", e),
        }
    }

    async fn load_persisted_queue(&self) -> Result<Vec<QueuedTrack>, AppError> {
        let entries = self.queue_store.list_ordered().await?;
        let mut tracks = Vec::with_capacity(entries.len());
        for entry in &entries {
            tracks.push(self.project_entry(entry).await?);
        }
        Ok(tracks)
    }

    /// Resolve a persisted entry to a playable track: song metadata, adder
    /// display name and a fresh signed URL.
    async fn project_entry(&self, entry: &QueueEntry) -> Result<QueuedTrack, AppError> {
        let song = self
            .songs
            .find_by_id(entry.song_id.clone())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("song {}", entry.song_id)))?;
        let adder = self.users.find_by_id(entry.added_by.clone()).await?;
        let url = self.signer.signed_url(&song.object_key).await?;
        Ok(QueuedTrack {
            song_id: song.id,
            track: Track {
                id: entry.id.as_i64(),
                title: song.title,
                artist: song.artist,
                url,
                duration: song.duration_secs,
                added_by: TrackAdder {
                    id: entry.added_by.as_i64(),
                    username: adder.map(|u| u.username).unwrap_or_default(),
                },
                added_at: Utc.from_utc_datetime(&entry.created_at),
            },
        })
    }

    /// Pure read; never suspends.
    pub fn queue_snapshot(&self) -> QueueState {
        let st = self.state.read();
        QueueState {
            current_track: st.queue.first().map(|q| q.track.clone()),
            queue: st.queue.iter().map(|q| q.track.clone()).collect(),
            listeners: self.listeners.len(),
            is_radio_active: st.is_radio_active,
        }
    }

    async fn ensure_admin(&self, caller: &UserId) -> Result<User, AppError> {
        let user = self.users.find_by_id(caller.clone()).await?;
        match user {
            Some(u) if u.is_admin() => Ok(u),
            _ => Err(AppError::AuthError(format!(
                "user {} may not manage the radio queue",
                caller
            ))),
        }
    }

    /// Flip the radio on or off. Turning on resumes the playback timer for
    /// the current track; turning off pauses it without clearing the queue.
    pub async fn toggle_radio_status(self: &Arc<Self>, caller: UserId) -> Result<bool, AppError> {
        let _guard = self.op_lock.lock().await;
        self.ensure_admin(&caller).await?;

        let active = {
            let mut st = self.state.write();
            st.is_radio_active = !st.is_radio_active;
            st.is_radio_active
        };

        if active {
            let head = self.state.read().queue.first().map(|q| q.track.clone());
            if let Some(head) = head {
                self.arm_advance_timer(head.duration);
            }
        } else {
            self.cancel_advance_timer();
        }

        info!("radio toggled {}", if active { "on" } else { "off" });
        let current = self.state.read().queue.first().map(|q| q.track.clone());
        self.broadcast(RadioEvent::RadioStatusChange {
            is_radio_active: active,
            current_track: current,
        });
        Ok(active)
    }

    /// Append a song to the queue tail. Persists first, then projects into
    /// memory; if projection fails the durable row stays and will be picked
    /// up by the next bootstrap, so nothing is rolled back.
    pub async fn add_to_queue(
        &self,
        song_id: SongId,
        caller: UserId,
    ) -> Result<QueueEntry, AppError> {
        let _guard = self.op_lock.lock().await;
        self.ensure_admin(&caller).await?;

        if self.songs.find_by_id(song_id.clone()).await?.is_none() {
            return Err(AppError::NotFound(format!("song {}", song_id)));
        }

        let persisted_max = self.queue_store.max_position().await?.unwrap_or(0);
        let position = persisted_max.max(self.high_water_position.load(Ordering::SeqCst)) + 1;
        let entry = self.queue_store.append(song_id, caller, position).await?;
        self.high_water_position.store(position, Ordering::SeqCst);

        let queued = match self.project_entry(&entry).await {
            Ok(q) => q,
            Err(e) => {
                warn!(
                    "queue entry {} persisted but projection failed: {}",
                    entry.id, e
                );
                return Err(e);
            }
        };

        let queue = {
            let mut st = self.state.write();
            st.queue.push(queued);
            st.queue.iter().map(|q| q.track.clone()).collect()
        };
        self.broadcast(RadioEvent::QueueUpdate { queue });
        Ok(entry)
    }

    /// Remove an entry by id. An unknown id is an idempotent no-op returning
    /// false, with no event. Removing the head never auto-advances; an
    /// explicit skip is the only path that cancels and re-arms the timer.
    pub async fn remove_from_queue(
        &self,
        entry_id: QueueEntryId,
        caller: UserId,
    ) -> Result<bool, AppError> {
        let _guard = self.op_lock.lock().await;
        self.ensure_admin(&caller).await?;

        let present = self
            .state
            .read()
            .queue
            .iter()
            .any(|q| q.track.id == entry_id.as_i64());
        if !present {
            return Ok(false);
        }

        self.queue_store.delete(entry_id.clone()).await?;
        let queue = {
            let mut st = self.state.write();
            st.queue.retain(|q| q.track.id != entry_id.as_i64());
            st.queue.iter().map(|q| q.track.clone()).collect()
        };
        self.broadcast(RadioEvent::QueueUpdate { queue });
        Ok(true)
    }

    /// Skip the current track: same sequence as a natural advance, run
    /// synchronously after cancelling the pending timer.
    pub async fn skip_current_track(self: &Arc<Self>, caller: UserId) -> Result<(), AppError> {
        let _guard = self.op_lock.lock().await;
        self.ensure_admin(&caller).await?;

        if self.state.read().queue.is_empty() {
            return Err(AppError::EmptyQueue);
        }
        self.cancel_advance_timer();
        self.advance_locked().await
    }

    /// Advance past the queue head. Caller must hold `op_lock`.
    async fn advance_locked(self: &Arc<Self>) -> Result<(), AppError> {
        let finished = match self.state.read().queue.first().map(|q| q.track.clone()) {
            Some(t) => t,
            None => {
                return Err(AppError::InvariantViolation(
                    "advance on empty queue".to_string(),
                ))
            }
        };

        self.queue_store
            .delete(QueueEntryId::from(finished.id))
            .await?;

        let (current, queue) = {
            let mut st = self.state.write();
            st.queue.remove(0);
            (
                st.queue.first().map(|q| q.track.clone()),
                st.queue.iter().map(|q| q.track.clone()).collect::<Vec<_>>(),
            )
        };

        let active = self.state.read().is_radio_active;
        if active {
            if let Some(next) = current.as_ref() {
                self.arm_advance_timer(next.duration);
            }
        }

        self.broadcast(RadioEvent::TrackChange {
            current_track: current,
            queue,
        });
        Ok(())
    }

    /// Arm the advance timer for `duration_secs`, cancelling any previously
    /// armed one. There is never more than one live advance timer.
    fn arm_advance_timer(self: &Arc<Self>, duration_secs: i64) {
        let mut timer = self.timer.lock();
        if let Some(handle) = timer.handle.take() {
            handle.abort();
        }
        timer.epoch += 1;
        let epoch = timer.epoch;
        let weak = Arc::downgrade(self);
        timer.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(duration_secs.max(0) as u64)).await;
            if let Some(engine) = weak.upgrade() {
                engine.advance_from_timer(epoch).await;
            }
        }));
    }

    fn cancel_advance_timer(&self) {
        let mut timer = self.timer.lock();
        if let Some(handle) = timer.handle.take() {
            handle.abort();
        }
        timer.epoch += 1;
    }

    async fn advance_from_timer(self: Arc<Self>, epoch: u64) {
        let _guard = self.op_lock.lock().await;
        {
            let mut timer = self.timer.lock();
            if timer.epoch != epoch {
                // A skip or toggle replaced this timer while it was firing.
                return;
            }
            // This handle is the running task itself; drop it so re-arming
            // for the next track does not abort us.
            timer.handle = None;
        }
        if let Err(e) = self.advance_locked().await {
            error!("automatic track advance failed: {}", e);
        }
    }

    /// Start the repeating URL-refresh cycle. Runs for the engine's lifetime
    /// and no-ops while the queue is empty.
    pub fn start_url_refresh(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.refresh_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(engine) = weak.upgrade() else { break };
                engine.refresh_urls().await;
            }
        });
    }

    /// Re-resolve every in-memory track through the catalog and the signer,
    /// replacing URLs in place without touching order or identifiers.
    async fn refresh_urls(&self) {
        let _guard = self.op_lock.lock().await;
        let mut tracks = self.state.read().queue.clone();
        if tracks.is_empty() {
            return;
        }
        for queued in tracks.iter_mut() {
            self.refresh_track(queued).await;
        }
        let queue: Vec<Track> = tracks.iter().map(|q| q.track.clone()).collect();
        self.state.write().queue = tracks;
        info!("refreshed signed urls for {} queued tracks", queue.len());
        self.broadcast(RadioEvent::QueueUpdate { queue });
    }

    /// A failed refresh keeps the old URL; the next cycle retries.
    async fn refresh_track(&self, queued: &mut QueuedTrack) {
        let song = match self.songs.find_by_id(queued.song_id.clone()).await {
            Ok(Some(song)) => song,
            Ok(None) => {
                warn!(
                    "song {} for queue entry {} vanished from the catalog",
                    queued.song_id, queued.track.id
                );
                return;
            }
            Err(e) => {
                warn!("catalog lookup failed during url refresh: {}", e);
                return;
            }
        };
        match self.signer.signed_url(&song.object_key).await {
            Ok(url) => queued.track.url = url,
            Err(e) => warn!(
                "url refresh failed for queue entry {}: {}",
                queued.track.id, e
            ),
        }
    }

    /// Register a listener channel. The first message on the channel is the
    /// full current state; everyone (the new channel included) then gets a
    /// listener-count update.
    pub fn register_listener(&self, sender: ListenerSender) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, sender.clone());
        if sender.send(RadioEvent::QueueSync(self.queue_snapshot())).is_err() {
            self.listeners.remove(&id);
        }
        self.broadcast(RadioEvent::ListenersUpdate {
            listeners: self.listeners.len(),
        });
        id
    }

    /// Invoked when the transport reports the channel closed.
    pub fn deregister_listener(&self, id: ListenerId) {
        if self.listeners.remove(&id).is_some() {
            self.broadcast(RadioEvent::ListenersUpdate {
                listeners: self.listeners.len(),
            });
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Fan an event out to every registered channel. A dead channel is
    /// dropped and fan-out continues for the rest.
    fn broadcast(&self, event: RadioEvent) {
        let mut dead = Vec::new();
        for entry in self.listeners.iter() {
            if entry.value().send(event.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.listeners.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use domain::radio::{QueueError, SignerError};
    use domain::song::{Song, SongError};
    use domain::user::{UserError, UserRole};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicI64;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct FakeCatalog {
        songs: HashMap<i64, Song>,
    }

    #[async_trait]
    impl SongRepository for FakeCatalog {
        async fn find_by_id(&self, id: SongId) -> Result<Option<Song>, SongError> {
            Ok(self.songs.get(&id.as_i64()).cloned())
        }
    }

    struct FakeUsers {
        users: HashMap<i64, User>,
    }

    #[async_trait]
    impl UserRepository for FakeUsers {
        async fn find_by_id(&self, id: UserId) -> Result<Option<User>, UserError> {
            Ok(self.users.get(&id.as_i64()).cloned())
        }
    }

    #[derive(Default)]
    struct FakeQueueStore {
        entries: parking_lot::Mutex<Vec<QueueEntry>>,
        next_id: AtomicI64,
        fail_list: bool,
    }

    #[async_trait]
    impl QueueRepository for FakeQueueStore {
        async fn append(
            &self,
            song_id: SongId,
            added_by: UserId,
            position: i32,
        ) -> Result<QueueEntry, QueueError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let entry = QueueEntry {
                id: QueueEntryId::from(id),
                song_id,
                added_by,
                position,
                created_at: Utc::now().naive_utc(),
            };
            self.entries.lock().push(entry.clone());
            Ok(entry)
        }

        async fn delete(&self, id: QueueEntryId) -> Result<(), QueueError> {
            self.entries.lock().retain(|e| e.id != id);
            Ok(())
        }

        async fn list_ordered(&self) -> Result<Vec<QueueEntry>, QueueError> {
            if self.fail_list {
                return Err(QueueError::DbErr("connection refused".to_string()));
            }
            let mut entries = self.entries.lock().clone();
            entries.sort_by_key(|e| e.position);
            Ok(entries)
        }

        async fn max_position(&self) -> Result<Option<i32>, QueueError> {
            Ok(self.entries.lock().iter().map(|e| e.position).max())
        }
    }

    struct FakeSigner {
        generation: AtomicI64,
    }

    #[async_trait]
    impl SignedUrlProvider for FakeSigner {
        async fn signed_url(&self, object_key: &str) -> Result<String, SignerError> {
            let generation = self.generation.fetch_add(1, Ordering::SeqCst);
            Ok(format!("signed://{}?gen={}", object_key, generation))
        }
    }

    const ADMIN: i64 = 1;
    const LISTENER: i64 = 2;

    fn song(id: i64, duration: i64) -> Song {
        Song {
            id: SongId::from(id),
            title: format!("song-{}", id),
            artist: "test artist".to_string(),
            object_key: format!("objects/{}", id),
            duration_secs: duration,
        }
    }

    fn setup(songs: Vec<Song>) -> (Arc<RadioEngine>, Arc<FakeQueueStore>) {
        let catalog = FakeCatalog {
            songs: songs.into_iter().map(|s| (s.id.as_i64(), s)).collect(),
        };
        let mut users = HashMap::new();
        users.insert(
            ADMIN,
            User {
                id: UserId::from(ADMIN),
                username: "alice".to_string(),
                role: UserRole::Admin,
            },
        );
        users.insert(
            LISTENER,
            User {
                id: UserId::from(LISTENER),
                username: "bob".to_string(),
                role: UserRole::Listener,
            },
        );
        let store = Arc::new(FakeQueueStore::default());
        let engine = RadioEngine::new(
            Arc::new(catalog),
            Arc::new(FakeUsers { users }),
            store.clone(),
            Arc::new(FakeSigner {
                generation: AtomicI64::new(0),
            }),
            Duration::from_secs(3000),
        );
        (engine, store)
    }

    fn listen(engine: &RadioEngine) -> (ListenerId, UnboundedReceiver<RadioEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = engine.register_listener(tx);
        (id, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<RadioEvent>) -> Vec<RadioEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn current_track_is_always_the_queue_head() {
        let (engine, _) = setup(vec![song(10, 180), song(11, 200)]);
        assert_eq!(engine.queue_snapshot().current_track, None);

        engine
            .add_to_queue(SongId::from(10), UserId::from(ADMIN))
            .await
            .unwrap();
        engine
            .add_to_queue(SongId::from(11), UserId::from(ADMIN))
            .await
            .unwrap();

        let snapshot = engine.queue_snapshot();
        assert_eq!(snapshot.queue.len(), 2);
        assert_eq!(snapshot.current_track, Some(snapshot.queue[0].clone()));
    }

    #[tokio::test]
    async fn positions_are_strictly_increasing_and_never_reused() {
        let (engine, store) = setup(vec![song(10, 180), song(11, 200), song(12, 90)]);
        let admin = UserId::from(ADMIN);

        let e1 = engine
            .add_to_queue(SongId::from(10), admin.clone())
            .await
            .unwrap();
        let e2 = engine
            .add_to_queue(SongId::from(11), admin.clone())
            .await
            .unwrap();
        assert_eq!(e1.position, 1);
        assert_eq!(e2.position, 2);

        // Removing the entry with the highest position must not free it.
        assert!(engine
            .remove_from_queue(e2.id.clone(), admin.clone())
            .await
            .unwrap());
        let e3 = engine
            .add_to_queue(SongId::from(12), admin.clone())
            .await
            .unwrap();
        assert_eq!(e3.position, 3);

        let positions: Vec<i32> = store.entries.lock().iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 3]);
    }

    #[tokio::test]
    async fn remove_of_unknown_entry_is_an_idempotent_no_op() {
        let (engine, _) = setup(vec![song(10, 180)]);
        let admin = UserId::from(ADMIN);
        engine
            .add_to_queue(SongId::from(10), admin.clone())
            .await
            .unwrap();

        let before = engine.queue_snapshot();
        let (_, mut rx) = listen(&engine);
        drain(&mut rx);

        let removed = engine
            .remove_from_queue(QueueEntryId::from(999), admin)
            .await
            .unwrap();
        assert!(!removed);
        assert!(drain(&mut rx).is_empty());

        let after = engine.queue_snapshot();
        assert_eq!(before.queue, after.queue);
        assert_eq!(before.current_track, after.current_track);
    }

    #[tokio::test]
    async fn skip_promotes_the_second_track_and_deletes_the_head() {
        let (engine, store) = setup(vec![song(10, 180), song(11, 200)]);
        let admin = UserId::from(ADMIN);
        let e1 = engine
            .add_to_queue(SongId::from(10), admin.clone())
            .await
            .unwrap();
        let e2 = engine
            .add_to_queue(SongId::from(11), admin.clone())
            .await
            .unwrap();

        let (_, mut rx) = listen(&engine);
        drain(&mut rx);

        engine.skip_current_track(admin).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RadioEvent::TrackChange {
                current_track,
                queue,
            } => {
                assert_eq!(current_track.as_ref().unwrap().id, e2.id.as_i64());
                assert_eq!(queue.len(), 1);
                assert_eq!(queue[0].id, e2.id.as_i64());
            }
            other => panic!("expected TRACK_CHANGE, got {:?}", other),
        }
        assert!(store.entries.lock().iter().all(|e| e.id != e1.id));
    }

    #[tokio::test]
    async fn skip_on_empty_queue_fails() {
        let (engine, _) = setup(vec![]);
        let err = engine
            .skip_current_track(UserId::from(ADMIN))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmptyQueue));
    }

    #[tokio::test]
    async fn removing_the_head_does_not_advance_playback() {
        let (engine, store) = setup(vec![song(10, 180), song(11, 200)]);
        let admin = UserId::from(ADMIN);
        let e1 = engine
            .add_to_queue(SongId::from(10), admin.clone())
            .await
            .unwrap();
        let e2 = engine
            .add_to_queue(SongId::from(11), admin.clone())
            .await
            .unwrap();

        let (_, mut rx) = listen(&engine);
        drain(&mut rx);

        assert!(engine
            .remove_from_queue(e1.id.clone(), admin)
            .await
            .unwrap());

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RadioEvent::QueueUpdate { .. }));

        let snapshot = engine.queue_snapshot();
        assert_eq!(snapshot.current_track.as_ref().unwrap().id, e2.id.as_i64());
        assert!(store.entries.lock().iter().any(|e| e.id == e2.id));
    }

    #[tokio::test]
    async fn listener_accounting_matches_registrations() {
        let (engine, _) = setup(vec![]);
        let (id1, mut rx1) = listen(&engine);
        let (_id2, mut rx2) = listen(&engine);
        let (_id3, mut rx3) = listen(&engine);
        assert_eq!(engine.queue_snapshot().listeners, 3);

        engine.deregister_listener(id1);
        assert_eq!(engine.queue_snapshot().listeners, 2);
        // Deregistering twice must not go negative or fire twice.
        engine.deregister_listener(id1);
        assert_eq!(engine.queue_snapshot().listeners, 2);

        let count_updates = |events: &[RadioEvent]| {
            events
                .iter()
                .filter(|e| matches!(e, RadioEvent::ListenersUpdate { .. }))
                .count()
        };
        // rx1: its own registration + two later registrations (it is already
        // out of the set when its own close broadcasts)
        assert_eq!(count_updates(&drain(&mut rx1)), 3);
        // rx2: its own registration + rx3's registration + rx1's close
        assert_eq!(count_updates(&drain(&mut rx2)), 3);
        // rx3: its own registration + rx1's close
        assert_eq!(count_updates(&drain(&mut rx3)), 2);
    }

    #[tokio::test]
    async fn first_message_on_a_new_channel_is_the_full_state() {
        let (engine, _) = setup(vec![song(10, 180)]);
        engine
            .add_to_queue(SongId::from(10), UserId::from(ADMIN))
            .await
            .unwrap();

        let (_, mut rx) = listen(&engine);
        let events = drain(&mut rx);
        match &events[0] {
            RadioEvent::QueueSync(state) => {
                assert_eq!(state.queue.len(), 1);
                assert_eq!(state.current_track, Some(state.queue[0].clone()));
                assert_eq!(state.listeners, 1);
            }
            other => panic!("expected QUEUE_SYNC first, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_admin_callers_are_rejected_without_side_effects() {
        let (engine, store) = setup(vec![song(10, 180)]);
        let caller = UserId::from(LISTENER);
        let (_, mut rx) = listen(&engine);
        drain(&mut rx);

        let add = engine
            .add_to_queue(SongId::from(10), caller.clone())
            .await
            .unwrap_err();
        let remove = engine
            .remove_from_queue(QueueEntryId::from(1), caller.clone())
            .await
            .unwrap_err();
        let skip = engine.skip_current_track(caller.clone()).await.unwrap_err();
        let toggle = engine.toggle_radio_status(caller).await.unwrap_err();
        for err in [add, remove, skip, toggle] {
            assert!(matches!(err, AppError::AuthError(_)));
        }

        // Unknown callers are rejected the same way.
        let unknown = engine
            .skip_current_track(UserId::from(777))
            .await
            .unwrap_err();
        assert!(matches!(unknown, AppError::AuthError(_)));

        assert!(drain(&mut rx).is_empty());
        assert!(store.entries.lock().is_empty());
        assert!(!engine.queue_snapshot().is_radio_active);
    }

    #[tokio::test(start_paused = true)]
    async fn toggling_on_arms_a_duration_synchronized_advance() {
        let (engine, store) = setup(vec![song(10, 10)]);
        let admin = UserId::from(ADMIN);
        let entry = engine
            .add_to_queue(SongId::from(10), admin.clone())
            .await
            .unwrap();

        let snapshot = engine.queue_snapshot();
        assert_eq!(
            snapshot.current_track.as_ref().unwrap().id,
            entry.id.as_i64()
        );
        assert_eq!(snapshot.queue.len(), 1);

        let (_, mut rx) = listen(&engine);
        let active = engine.toggle_radio_status(admin).await.unwrap();
        assert!(active);
        drain(&mut rx);

        // Nothing happens before the track's duration elapses.
        tokio::time::sleep(Duration::from_secs(9)).await;
        settle().await;
        assert!(drain(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RadioEvent::TrackChange {
                current_track,
                queue,
            } => {
                assert!(current_track.is_none());
                assert!(queue.is_empty());
            }
            other => panic!("expected TRACK_CHANGE, got {:?}", other),
        }
        assert!(store.entries.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn toggling_off_pauses_without_clearing_the_queue() {
        let (engine, _) = setup(vec![song(10, 10)]);
        let admin = UserId::from(ADMIN);
        engine
            .add_to_queue(SongId::from(10), admin.clone())
            .await
            .unwrap();

        engine.toggle_radio_status(admin.clone()).await.unwrap();
        let active = engine.toggle_radio_status(admin).await.unwrap();
        assert!(!active);

        let (_, mut rx) = listen(&engine);
        drain(&mut rx);
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;

        assert!(drain(&mut rx).is_empty());
        let snapshot = engine.queue_snapshot();
        assert_eq!(snapshot.queue.len(), 1);
        assert!(snapshot.current_track.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn skip_mid_playback_replaces_the_armed_timer() {
        let (engine, _) = setup(vec![song(10, 10), song(11, 20)]);
        let admin = UserId::from(ADMIN);
        engine
            .add_to_queue(SongId::from(10), admin.clone())
            .await
            .unwrap();
        let e2 = engine
            .add_to_queue(SongId::from(11), admin.clone())
            .await
            .unwrap();

        engine.toggle_radio_status(admin.clone()).await.unwrap();

        // Five seconds into the first track's ten, skip it.
        tokio::time::sleep(Duration::from_secs(5)).await;
        let (_, mut rx) = listen(&engine);
        drain(&mut rx);
        engine.skip_current_track(admin).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RadioEvent::TrackChange { current_track, .. } => {
                assert_eq!(current_track.as_ref().unwrap().id, e2.id.as_i64());
            }
            other => panic!("expected TRACK_CHANGE, got {:?}", other),
        }

        // The first track's timer would have fired at t=10; the skip replaced
        // it, so crossing that mark must not advance again.
        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert!(drain(&mut rx).is_empty());
        let snapshot = engine.queue_snapshot();
        assert_eq!(snapshot.current_track.as_ref().unwrap().id, e2.id.as_i64());
        assert_eq!(snapshot.queue.len(), 1);

        // The promoted track's own twenty-second duration drives the next
        // advance, measured from the skip at t=5.
        tokio::time::sleep(Duration::from_secs(15)).await;
        settle().await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            RadioEvent::TrackChange {
                current_track,
                queue,
            } => {
                assert!(current_track.is_none());
                assert!(queue.is_empty());
            }
            other => panic!("expected TRACK_CHANGE, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn advance_chains_through_the_whole_queue() {
        let (engine, _) = setup(vec![song(10, 10), song(11, 20)]);
        let admin = UserId::from(ADMIN);
        engine
            .add_to_queue(SongId::from(10), admin.clone())
            .await
            .unwrap();
        let e2 = engine
            .add_to_queue(SongId::from(11), admin.clone())
            .await
            .unwrap();

        engine.toggle_radio_status(admin).await.unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;
        let snapshot = engine.queue_snapshot();
        assert_eq!(snapshot.current_track.as_ref().unwrap().id, e2.id.as_i64());

        // Second track's own 20s timer is armed off its duration.
        tokio::time::sleep(Duration::from_secs(21)).await;
        settle().await;
        let snapshot = engine.queue_snapshot();
        assert!(snapshot.current_track.is_none());
        assert!(snapshot.queue.is_empty());
    }

    #[tokio::test]
    async fn broadcast_reaches_every_listener_with_the_same_payload() {
        let (engine, _) = setup(vec![song(10, 180)]);
        let (_, mut rx1) = listen(&engine);
        let (_, mut rx2) = listen(&engine);
        let (_, mut rx3) = listen(&engine);
        drain(&mut rx1);
        drain(&mut rx2);
        drain(&mut rx3);

        engine
            .add_to_queue(SongId::from(10), UserId::from(ADMIN))
            .await
            .unwrap();

        let e1 = drain(&mut rx1);
        let e2 = drain(&mut rx2);
        let e3 = drain(&mut rx3);
        assert_eq!(e1.len(), 1);
        assert!(matches!(e1[0], RadioEvent::QueueUpdate { .. }));
        assert_eq!(e1, e2);
        assert_eq!(e1, e3);
    }

    #[tokio::test]
    async fn dead_channels_are_dropped_and_fanout_continues() {
        let (engine, _) = setup(vec![song(10, 180)]);
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        engine.register_listener(tx_dead);
        drop(rx_dead);
        let (_, mut rx_live) = listen(&engine);
        drain(&mut rx_live);

        engine
            .add_to_queue(SongId::from(10), UserId::from(ADMIN))
            .await
            .unwrap();

        let events = drain(&mut rx_live);
        assert!(events
            .iter()
            .any(|e| matches!(e, RadioEvent::QueueUpdate { .. })));
        assert_eq!(engine.listener_count(), 1);
    }

    #[tokio::test]
    async fn bootstrap_projects_the_persisted_queue_in_position_order() {
        let (engine, store) = setup(vec![song(10, 180), song(11, 200)]);
        store
            .append(SongId::from(11), UserId::from(ADMIN), 2)
            .await
            .unwrap();
        store
            .append(SongId::from(10), UserId::from(ADMIN), 1)
            .await
            .unwrap();

        engine.bootstrap().await;

        let snapshot = engine.queue_snapshot();
        assert_eq!(snapshot.queue.len(), 2);
        assert_eq!(snapshot.queue[0].title, "song-10");
        assert_eq!(snapshot.queue[1].title, "song-11");
        assert_eq!(snapshot.current_track, Some(snapshot.queue[0].clone()));

        // Positions handed out after bootstrap continue past the persisted max.
        let e3 = engine
            .add_to_queue(SongId::from(10), UserId::from(ADMIN))
            .await
            .unwrap();
        assert_eq!(e3.position, 3);
    }

    #[tokio::test]
    async fn bootstrap_failure_leaves_an_empty_queue() {
        let catalog = FakeCatalog {
            songs: HashMap::new(),
        };
        let store = Arc::new(FakeQueueStore {
            fail_list: true,
            ..Default::default()
        });
        let engine = RadioEngine::new(
            Arc::new(catalog),
            Arc::new(FakeUsers {
                users: HashMap::new(),
            }),
            store,
            Arc::new(FakeSigner {
                generation: AtomicI64::new(0),
            }),
            Duration::from_secs(3000),
        );
        engine.bootstrap().await;
        let snapshot = engine.queue_snapshot();
        assert!(snapshot.queue.is_empty());
        assert_eq!(snapshot.current_track, None);
    }

    #[tokio::test]
    async fn url_refresh_replaces_urls_in_place() {
        let (engine, _) = setup(vec![song(10, 180), song(11, 200)]);
        let admin = UserId::from(ADMIN);
        engine
            .add_to_queue(SongId::from(10), admin.clone())
            .await
            .unwrap();
        engine.add_to_queue(SongId::from(11), admin).await.unwrap();

        let before = engine.queue_snapshot();
        let (_, mut rx) = listen(&engine);
        drain(&mut rx);

        engine.refresh_urls().await;

        let after = engine.queue_snapshot();
        assert_eq!(after.queue.len(), before.queue.len());
        for (old, new) in before.queue.iter().zip(after.queue.iter()) {
            assert_eq!(old.id, new.id);
            assert_eq!(old.title, new.title);
            assert_ne!(old.url, new.url);
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RadioEvent::QueueUpdate { .. }));
    }

    #[tokio::test]
    async fn url_refresh_on_an_empty_queue_is_silent() {
        let (engine, _) = setup(vec![]);
        let (_, mut rx) = listen(&engine);
        drain(&mut rx);
        engine.refresh_urls().await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn adding_a_missing_song_fails_without_persisting() {
        let (engine, store) = setup(vec![]);
        let err = engine
            .add_to_queue(SongId::from(404), UserId::from(ADMIN))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(store.entries.lock().is_empty());
    }
}
