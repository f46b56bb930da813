//! Fan-out of one session's output to many readers.
//!
//! The hub owns the session's [`ScreenBuffer`]. Feeding the buffer and
//! queueing the chunk for readers happen under the same lock, so a reader
//! that attaches gets a snapshot followed by exactly the chunks that were
//! not yet in it. The snapshot is captured under the lock but rendered by
//! the reader, outside it.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use ptymux_types::StreamEvent;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::screen_buffer::{ScreenBuffer, ScreenCapture, Snapshot};

type ReaderId = u64;

struct HubState {
    buffer: ScreenBuffer,
    readers: HashMap<ReaderId, mpsc::Sender<StreamEvent>>,
    exit_code: Option<i32>,
}

pub struct StreamHub {
    state: Mutex<HubState>,
    next_reader: AtomicU64,
    queue_capacity: usize,
}

impl StreamHub {
    pub fn new(buffer: ScreenBuffer, queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HubState {
                buffer,
                readers: HashMap::new(),
                exit_code: None,
            }),
            next_reader: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a reader. Its first event is a snapshot of the buffer; after
    /// exit it also gets the exit event right away and is not registered.
    pub fn attach(self: &Arc<Self>) -> ReaderHandle {
        let id = self.next_reader.fetch_add(1, Ordering::Relaxed);
        // One slot beyond the data budget stays free for the exit event
        let (tx, rx) = mpsc::channel(self.queue_capacity + 1);

        let mut state = self.lock();
        let capture = state.buffer.capture();

        match state.exit_code {
            Some(code) => {
                let _ = tx.try_send(StreamEvent::Exit { code });
            }
            None => {
                state.readers.insert(id, tx);
            }
        }
        debug!(reader = id, readers = state.readers.len(), "reader attached");

        ReaderHandle {
            id,
            hub: Arc::downgrade(self),
            pending: Some(capture),
            rx,
        }
    }

    pub fn detach(&self, id: ReaderId) {
        if self.lock().readers.remove(&id).is_some() {
            debug!(reader = id, "reader detached");
        }
    }

    /// Feed a chunk to the buffer and queue it for every reader. A reader
    /// whose queue is full is disconnected instead of stalling the producer.
    pub fn publish(&self, data: Bytes) {
        let mut state = self.lock();
        state.buffer.feed(&data);

        let mut gone = Vec::new();
        for (&id, tx) in &state.readers {
            if tx.is_closed() {
                gone.push(id);
            } else if tx.capacity() <= 1 {
                warn!(reader = id, "reader queue full, disconnecting slow reader");
                gone.push(id);
            } else if tx.try_send(StreamEvent::Data(data.clone())).is_err() {
                gone.push(id);
            }
        }
        for id in gone {
            state.readers.remove(&id);
        }
    }

    /// Deliver the exit event to every reader and detach them all. Only the
    /// first call has any effect.
    pub fn close(&self, code: i32) {
        let mut state = self.lock();
        if state.exit_code.is_some() {
            return;
        }
        state.exit_code = Some(code);
        for (_, tx) in state.readers.drain() {
            let _ = tx.try_send(StreamEvent::Exit { code });
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let capture = self.lock().buffer.capture();
        capture.render()
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        self.lock().buffer.resize(cols, rows);
    }

    pub fn title(&self) -> Option<String> {
        self.lock().buffer.title().map(str::to_string)
    }

    pub fn reader_count(&self) -> usize {
        self.lock().readers.len()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.lock().exit_code
    }

    /// Run `f` against the buffer while holding the hub lock.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&ScreenBuffer) -> R) -> R {
        f(&self.lock().buffer)
    }
}

/// Receiving end of one attached reader. Dropping it detaches the reader.
pub struct ReaderHandle {
    id: ReaderId,
    hub: Weak<StreamHub>,
    /// Screen as of attach, delivered before anything in `rx`
    pending: Option<ScreenCapture>,
    rx: mpsc::Receiver<StreamEvent>,
}

impl ReaderHandle {
    pub fn id(&self) -> ReaderId {
        self.id
    }

    /// Next event, or `None` once the reader has been detached and its
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        if let Some(snapshot) = self.take_snapshot() {
            return Some(snapshot);
        }
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.take_snapshot().or_else(|| self.rx.try_recv().ok())
    }

    fn take_snapshot(&mut self) -> Option<StreamEvent> {
        self.pending
            .take()
            .map(|capture| StreamEvent::Snapshot(capture.render().ansi))
    }
}

impl Stream for ReaderHandle {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(snapshot) = self.take_snapshot() {
            return Poll::Ready(Some(snapshot));
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.detach(self.id);
        }
    }
}

impl std::fmt::Debug for ReaderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderHandle").field("id", &self.id).finish()
    }
}
