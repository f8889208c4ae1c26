//! # Broadcast Hub
//!
//! Per-board fan-out of committed mutations to attached viewer channels.
//!
//! Each channel is a bounded queue drained by its own transport task, so
//! `publish` never waits on a network write. A channel whose queue is full or
//! whose receiver is gone is detached on the spot; other channels are not
//! affected. Publishing holds the board's shard guard only while enqueueing,
//! which gives every channel on a board the same event order.
//!
//! Mutations take the board's [`BoardTurn`] before their transaction and
//! publish before releasing it, so the stream order of a board matches the
//! order in which its mutations committed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domains::{BoardEvent, SseFrame, Viewer};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

pub type ChannelId = u64;

struct Subscriber {
    id: ChannelId,
    viewer: Viewer,
    tx: mpsc::Sender<Arc<SseFrame>>,
}

struct HubInner {
    boards: DashMap<Uuid, Vec<Subscriber>>,
    turns: DashMap<Uuid, Arc<Mutex<()>>>,
    next_id: AtomicU64,
    capacity: usize,
}

/// Process-wide registry of viewer channels, cheap to clone.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    /// `capacity` bounds how many undelivered frames a channel may hold.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                boards: DashMap::new(),
                turns: DashMap::new(),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Registers a channel for `board_id`. The returned subscription starts
    /// with the `connected` greeting and detaches itself when dropped.
    pub fn attach(&self, board_id: Uuid, viewer: Viewer) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        // Fresh queue with capacity >= 1, so the greeting always fits.
        let _ = tx.try_send(Arc::new(SseFrame::connected(board_id)));

        let mut subs = self.inner.boards.entry(board_id).or_default();
        subs.push(Subscriber {
            id,
            viewer: viewer.clone(),
            tx,
        });
        debug!(%board_id, channel = id, viewers = subs.len(), "viewer attached");
        drop(subs);

        Subscription {
            hub: self.clone(),
            board_id,
            id,
            viewer,
            rx,
        }
    }

    /// Removes a channel. Returns whether it was still attached; detaching
    /// twice is a no-op.
    pub fn detach(&self, board_id: Uuid, channel: ChannelId) -> bool {
        let Entry::Occupied(mut entry) = self.inner.boards.entry(board_id) else {
            return false;
        };
        let subs = entry.get_mut();
        let before = subs.len();
        subs.retain(|sub| sub.id != channel);
        let removed = subs.len() != before;
        if subs.is_empty() {
            entry.remove();
        }
        if removed {
            debug!(%board_id, channel, "viewer detached");
        }
        removed
    }

    /// Fans `event` out to every channel on `board_id`. Returns the number
    /// of channels that accepted it. Best effort, at most once.
    pub fn publish(&self, board_id: Uuid, event: &BoardEvent) -> usize {
        if !self.inner.boards.contains_key(&board_id) {
            return 0;
        }
        let rendered = match event.render() {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!(%board_id, event = event.name(), error = %err, "failed to serialize event");
                return 0;
            }
        };

        let mut delivered = 0;
        let emptied = match self.inner.boards.get_mut(&board_id) {
            None => return 0,
            Some(mut subs) => {
                subs.retain(|sub| match sub.tx.try_send(rendered.frame_for(&sub.viewer)) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(TrySendError::Full(_)) => {
                        warn!(%board_id, channel = sub.id, "viewer channel overflowed, detaching");
                        false
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(%board_id, channel = sub.id, "viewer channel closed, detaching");
                        false
                    }
                });
                subs.is_empty()
            }
        };
        if emptied {
            self.inner.boards.remove_if(&board_id, |_, subs| subs.is_empty());
        }

        debug!(%board_id, event = event.name(), delivered, "event published");
        delivered
    }

    /// Waits for exclusive commit-and-publish rights on `board_id`. Hold the
    /// turn until the mutation's event has been published.
    pub async fn turn(&self, board_id: Uuid) -> BoardTurn {
        let mutex = self.inner.turns.entry(board_id).or_default().clone();
        BoardTurn {
            hub: self.clone(),
            board_id,
            guard: Some(mutex.lock_owned().await),
        }
    }

    /// Drops every channel of `board_id`. Their streams end once the frames
    /// already queued are drained. Returns how many channels were closed.
    pub fn close_board(&self, board_id: Uuid) -> usize {
        let closed = self
            .inner
            .boards
            .remove(&board_id)
            .map(|(_, subs)| subs.len())
            .unwrap_or(0);
        if closed > 0 {
            debug!(%board_id, closed, "board channels closed");
        }
        closed
    }

    pub fn channel_count(&self, board_id: Uuid) -> usize {
        self.inner
            .boards
            .get(&board_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    pub fn board_count(&self) -> usize {
        self.inner.boards.len()
    }

    /// Channels attached across all boards.
    pub fn viewer_count(&self) -> usize {
        self.inner.boards.iter().map(|subs| subs.len()).sum()
    }
}

/// Exclusive right to commit and publish on one board, released on drop.
pub struct BoardTurn {
    hub: BroadcastHub,
    board_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for BoardTurn {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.hub
            .inner
            .turns
            .remove_if(&self.board_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// One attached viewer channel: the receiving end of its frame queue.
pub struct Subscription {
    hub: BroadcastHub,
    board_id: Uuid,
    id: ChannelId,
    viewer: Viewer,
    rx: mpsc::Receiver<Arc<SseFrame>>,
}

impl Subscription {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn board_id(&self) -> Uuid {
        self.board_id
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// Next frame, or `None` once the hub has dropped this channel.
    pub async fn recv(&mut self) -> Option<Arc<SseFrame>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<SseFrame>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.detach(self.board_id, self.id);
    }
}
