//! Crop Broadcast Synchronizer.
//!
//! The analyzer surface announces the on-screen rectangle of its video
//! element; the recorder consumes it. Both sides meet on a channel keyed
//! by [`SessionId::channel_key`], which is the only place the key format
//! is built.
//!
//! Delivery is last-message-wins. A receiver only ever sees rectangles
//! published after it subscribed: anything already sitting on the channel
//! is treated as stale, and the receiver asks the sender to re-announce.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use swingcast_capture_model::{BroadcastedRect, SessionId};
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct Channel {
    rect_tx: watch::Sender<Option<BroadcastedRect>>,
    refresh_tx: watch::Sender<u64>,
}

impl Channel {
    fn new() -> Self {
        Self {
            rect_tx: watch::channel(None).0,
            refresh_tx: watch::channel(0).0,
        }
    }

    /// Receivers hold `rect_tx` subscriptions, senders `refresh_tx` ones.
    fn is_attached(&self) -> bool {
        self.rect_tx.receiver_count() > 0 || self.refresh_tx.receiver_count() > 0
    }
}

/// Drop channels nobody holds either end of anymore.
fn prune(channels: &mut HashMap<String, Channel>) {
    channels.retain(|key, channel| {
        let keep = channel.is_attached();
        if !keep {
            tracing::debug!(channel = %key, "Dropping detached broadcast channel");
        }
        keep
    });
}

/// In-process registry of broadcast channels. Channels are created on
/// first attach and dropped once both ends have gone away.
#[derive(Clone, Default)]
pub struct CropBroadcastHub {
    channels: Arc<Mutex<HashMap<String, Channel>>>,
}

impl CropBroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a sender to the session's channel.
    pub fn sender(&self, session: &SessionId) -> CropSender {
        let key = session.channel_key();
        let mut channels = self.channels.lock();
        prune(&mut channels);
        let channel = channels.entry(key.clone()).or_insert_with(Channel::new);
        let mut refresh_rx = channel.refresh_tx.subscribe();
        refresh_rx.borrow_and_update();
        CropSender {
            key,
            rect_tx: channel.rect_tx.clone(),
            refresh_rx,
        }
    }

    /// Attach a receiver to the session's channel and request a fresh
    /// broadcast from any sender already attached.
    pub fn receiver(&self, session: &SessionId) -> CropReceiver {
        let key = session.channel_key();
        let mut channels = self.channels.lock();
        prune(&mut channels);
        let channel = channels.entry(key.clone()).or_insert_with(Channel::new);
        let mut rect_rx = channel.rect_tx.subscribe();
        rect_rx.borrow_and_update();
        let receiver = CropReceiver {
            key,
            rect_rx,
            refresh_tx: channel.refresh_tx.clone(),
            latest: None,
        };
        receiver.request_refresh();
        receiver
    }
}

/// Bounds of the observed element and its viewport, in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementBounds {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
}

impl ElementBounds {
    fn to_rect(self) -> BroadcastedRect {
        BroadcastedRect::new(
            self.left,
            self.top,
            self.width,
            self.height,
            self.viewport_width,
            self.viewport_height,
            chrono::Utc::now().timestamp_millis(),
        )
    }
}

/// Publishing half, owned by the analyzer surface.
pub struct CropSender {
    key: String,
    rect_tx: watch::Sender<Option<BroadcastedRect>>,
    refresh_rx: watch::Receiver<u64>,
}

impl CropSender {
    pub fn channel_key(&self) -> &str {
        &self.key
    }

    /// Publish a rectangle, superseding any previous one.
    pub fn publish(&self, rect: BroadcastedRect) {
        tracing::trace!(channel = %self.key, ?rect, "Publishing crop rectangle");
        self.rect_tx.send_replace(Some(rect));
    }

    /// Wait until a receiver asks for a fresh broadcast.
    pub async fn refresh_requested(&mut self) -> bool {
        self.refresh_rx.changed().await.is_ok()
    }

    /// Observe an element: publish on mount, on every bounds change
    /// (element or window resize), and again whenever a receiver asks.
    pub fn observe(mut self, mut bounds: watch::Receiver<ElementBounds>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let initial = *bounds.borrow_and_update();
            self.publish(initial.to_rect());
            loop {
                tokio::select! {
                    changed = bounds.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = *bounds.borrow_and_update();
                        self.publish(current.to_rect());
                    }
                    requested = self.refresh_rx.changed() => {
                        if requested.is_err() {
                            break;
                        }
                        let current = *bounds.borrow();
                        tracing::debug!(channel = %self.key, "Re-announcing crop on request");
                        self.publish(current.to_rect());
                    }
                }
            }
            tracing::debug!(channel = %self.key, "Element observer detached");
        })
    }
}

/// Consuming half, owned by the recorder.
pub struct CropReceiver {
    key: String,
    rect_rx: watch::Receiver<Option<BroadcastedRect>>,
    refresh_tx: watch::Sender<u64>,
    latest: Option<BroadcastedRect>,
}

impl CropReceiver {
    pub fn channel_key(&self) -> &str {
        &self.key
    }

    /// The most recent rectangle published since this receiver attached.
    pub fn current(&mut self) -> Option<BroadcastedRect> {
        if self.rect_rx.has_changed().unwrap_or(false) {
            if let Some(rect) = *self.rect_rx.borrow_and_update() {
                self.latest = Some(rect);
            }
        }
        self.latest
    }

    /// Wait for the next publish and return it.
    pub async fn next(&mut self) -> Option<BroadcastedRect> {
        loop {
            self.rect_rx.changed().await.ok()?;
            if let Some(rect) = *self.rect_rx.borrow_and_update() {
                self.latest = Some(rect);
                return Some(rect);
            }
        }
    }

    /// A second receiver on the same channel that starts from this one's
    /// view and asks senders to re-announce. Used to give each take its
    /// own receiver while the engine keeps the attached one.
    pub fn resubscribe(&self) -> CropReceiver {
        let receiver = CropReceiver {
            key: self.key.clone(),
            rect_rx: self.rect_rx.clone(),
            refresh_tx: self.refresh_tx.clone(),
            latest: self.latest,
        };
        receiver.request_refresh();
        receiver
    }

    /// Ask attached senders to re-announce.
    pub fn request_refresh(&self) {
        self.refresh_tx.send_modify(|n| *n = n.wrapping_add(1));
    }
}
