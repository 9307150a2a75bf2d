//! Fan-out of one pipeline's encoded frames to many viewers.
//!
//! Each subscriber gets its own bounded channel. Publishing never blocks:
//! when a subscriber's buffer is full the oldest queued frame is discarded to
//! make room, so a slow viewer skips frames instead of stalling the producer
//! or its siblings. Dropping a `Subscription` detaches it immediately.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::error::PipelineClosed;
use crate::frame::EncodedFrame;

pub const DEFAULT_BOUNDARY: &str = "frame";
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 4;

struct SubscriberSlot {
    id: u64,
    tx: Sender<EncodedFrame>,
    /// Receiver clone used to evict the oldest queued frame on overflow.
    evict: Receiver<EncodedFrame>,
}

struct MuxInner {
    subscribers: Vec<SubscriberSlot>,
    next_id: u64,
    closed: bool,
    dropped_frames: u64,
}

/// Per-pipeline broadcaster.
pub struct StreamMultiplexer {
    index: usize,
    buffer: usize,
    inner: Mutex<MuxInner>,
}

impl StreamMultiplexer {
    pub fn new(index: usize, buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            index,
            buffer: buffer.max(1),
            inner: Mutex::new(MuxInner {
                subscribers: Vec::new(),
                next_id: 0,
                closed: false,
                dropped_frames: 0,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MuxInner> {
        // Slots hold no invariants a panicking holder could break.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach a new viewer. It sees frames published from now on only.
    ///
    /// On a closed multiplexer the returned subscription is already finished.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = crossbeam_channel::bounded(self.buffer);
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        if inner.closed {
            drop(tx);
        } else {
            inner.subscribers.push(SubscriberSlot {
                id,
                tx,
                evict: rx.clone(),
            });
            log::debug!(
                "camera {}: subscriber {} attached ({} total)",
                self.index,
                id,
                inner.subscribers.len()
            );
        }
        Subscription {
            index: self.index,
            id,
            rx,
            mux: Arc::downgrade(self),
        }
    }

    /// Deliver `frame` to every current subscriber without blocking.
    pub fn publish(&self, frame: EncodedFrame) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        let mut dropped = 0u64;
        for slot in &inner.subscribers {
            match slot.tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(frame)) => {
                    let _ = slot.evict.try_recv();
                    dropped += 1;
                    let _ = slot.tx.try_send(frame);
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        inner.dropped_frames += dropped;
    }

    /// End every subscription. Queued frames are still delivered.
    pub fn close(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        let count = inner.subscribers.len();
        inner.subscribers.clear();
        log::debug!("camera {}: closed with {} subscribers", self.index, count);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Frames discarded by the drop-oldest policy across all subscribers.
    pub fn dropped_frames(&self) -> u64 {
        self.lock().dropped_frames
    }

    fn detach(&self, id: u64) {
        let mut inner = self.lock();
        inner.subscribers.retain(|slot| slot.id != id);
    }
}

/// One viewer's lazy frame sequence.
///
/// Blocks while the pipeline is paused; ends once the pipeline closes.
pub struct Subscription {
    index: usize,
    id: u64,
    rx: Receiver<EncodedFrame>,
    mux: Weak<StreamMultiplexer>,
}

impl Subscription {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Next frame, blocking until one is published.
    pub fn next_frame(&self) -> Result<EncodedFrame, PipelineClosed> {
        self.rx
            .recv()
            .map_err(|_| PipelineClosed { index: self.index })
    }

    /// Like `next_frame` with a deadline. `Ok(None)` means nothing arrived in time.
    pub fn next_frame_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<EncodedFrame>, PipelineClosed> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(PipelineClosed { index: self.index }),
        }
    }
}

impl Iterator for Subscription {
    type Item = EncodedFrame;

    fn next(&mut self) -> Option<EncodedFrame> {
        self.next_frame().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(mux) = self.mux.upgrade() {
            mux.detach(self.id);
            log::debug!("camera {}: subscriber {} detached", self.index, self.id);
        }
    }
}

// ----------------------------------------------------------------------------
// multipart/x-mixed-replace framing
// ----------------------------------------------------------------------------

/// `Content-Type` header value for a multipart stream.
pub fn multipart_content_type(boundary: &str) -> String {
    format!("multipart/x-mixed-replace; boundary={}", boundary)
}

/// Write one part: boundary line, part headers, payload, trailing CRLF.
pub fn write_part<W: Write>(writer: &mut W, boundary: &str, frame: &EncodedFrame) -> io::Result<()> {
    let header = format!(
        "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        boundary,
        frame.content_type,
        frame.len()
    );
    writer.write_all(header.as_bytes())?;
    writer.write_all(frame.bytes())?;
    writer.write_all(b"\r\n")?;
    writer.flush()
}
