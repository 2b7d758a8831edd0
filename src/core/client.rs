//! One live socket bound to a `(user, chat)` pair
//!
//! A client owns its bounded outbound queue and a cancellation handle.
//! Exactly two tasks touch the socket: the read pump and the write pump.
//! Everyone else communicates through `send_raw`, which never blocks.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use warp::ws::{Message as WsMessage, WebSocket};

use crate::constants::{MAX_FRAME_SIZE, PING_PERIOD, PONG_WAIT, SEND_QUEUE_SIZE, WRITE_WAIT};
use crate::core::events::{InEvent, OutEvent};
use crate::core::rate_limiter::RateLimiter;

pub struct Client {
    pub user_id: u64,
    pub chat_id: u64,
    outbox: mpsc::Sender<String>,
    outbox_rx: Mutex<Option<mpsc::Receiver<String>>>,
    cancel: watch::Sender<bool>,
    closed: Mutex<bool>,
    limiter: Mutex<RateLimiter>,
}

impl Client {
    pub fn new(user_id: u64, chat_id: u64) -> Arc<Self> {
        let (outbox, outbox_rx) = mpsc::channel(SEND_QUEUE_SIZE);
        let (cancel, _) = watch::channel(false);

        Arc::new(Self {
            user_id,
            chat_id,
            outbox,
            outbox_rx: Mutex::new(Some(outbox_rx)),
            cancel,
            closed: Mutex::new(false),
            limiter: Mutex::new(RateLimiter::per_second(
                crate::constants::DEFAULT_RATE_LIMIT_PER_SEC,
            )),
        })
    }

    /// Replaces the per-client limiter with one admitting `per_second` events
    pub fn set_rate(&self, per_second: u32) {
        let mut limiter = self.lock_limiter();
        *limiter = RateLimiter::per_second(per_second);
    }

    pub fn check_rate_limit(&self) -> bool {
        self.lock_limiter().allow()
    }

    /// Non-blocking enqueue of one outbound frame.
    ///
    /// Returns false when the client is closed or its queue is full; the
    /// frame is dropped silently. A slow consumer degrades only itself.
    pub fn send_raw(&self, frame: String) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outbox.try_send(frame).is_ok()
    }

    /// Serializes an event and enqueues it
    pub fn send_event(&self, event: &OutEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(frame) => self.send_raw(frame),
            Err(e) => {
                warn!("client {}: failed to marshal event: {}", self.user_id, e);
                false
            }
        }
    }

    /// Idempotent close: flips the closed flag and cancels both pumps.
    ///
    /// The write pump emits a close frame and drops its half of the socket;
    /// the read pump drops the other. Queue and socket are released once.
    pub fn close(&self) {
        let mut closed = self
            .closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return;
        }
        *closed = true;
        let _ = self.cancel.send(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscription used by the pumps to observe cancellation
    pub fn cancelled(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    /// Hands the outbound queue to the write pump; only the first caller
    /// gets it.
    pub fn take_outbox(&self) -> Option<mpsc::Receiver<String>> {
        self.outbox_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn lock_limiter(&self) -> std::sync::MutexGuard<'_, RateLimiter> {
        self.limiter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads frames until error, deadline expiry, close frame or
    /// cancellation. Each decoded event is dispatched to `handler`
    /// synchronously from this task, which serializes a sender's pipeline.
    pub async fn read_pump<F, Fut>(
        self: Arc<Self>,
        mut stream: SplitStream<WebSocket>,
        handler: F,
    ) where
        F: Fn(Arc<Client>, InEvent) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut cancel = self.cancelled();
        // a close that raced the subscription above would never trip it
        if self.is_closed() {
            return;
        }

        loop {
            tokio::select! {
                _ = cancel.changed() => break,
                next = timeout(PONG_WAIT, stream.next()) => {
                    let msg = match next {
                        // no frame (not even a pong) within the deadline
                        Err(_) => {
                            debug!("client {}: read deadline expired", self.user_id);
                            break;
                        }
                        Ok(None) => break,
                        Ok(Some(Err(e))) => {
                            debug!("client {}: read error: {}", self.user_id, e);
                            break;
                        }
                        Ok(Some(Ok(msg))) => msg,
                    };

                    if msg.is_close() {
                        break;
                    }
                    // pings and pongs only refresh the deadline
                    if msg.is_ping() || msg.is_pong() {
                        continue;
                    }

                    let text = match msg.to_str() {
                        Ok(text) => text,
                        Err(_) => continue,
                    };
                    if text.len() > MAX_FRAME_SIZE {
                        debug!(
                            "client {}: oversized frame ({} bytes)",
                            self.user_id,
                            text.len()
                        );
                        break;
                    }

                    let mut event: InEvent = match serde_json::from_str(text) {
                        Ok(event) => event,
                        Err(e) => {
                            debug!("client {}: undecodable frame: {}", self.user_id, e);
                            break;
                        }
                    };
                    if event.timestamp == 0 {
                        event.timestamp = Utc::now().timestamp_millis();
                    }

                    handler(Arc::clone(&self), event).await;
                }
            }
        }

        self.close();
    }

    /// Sole owner of socket writes: drains the queue with a per-write
    /// deadline, pings on a timer, coalesces queued frames into one flush
    /// and emits a close frame when the queue closes or cancellation fires.
    pub async fn write_pump(self: Arc<Self>, mut sink: SplitSink<WebSocket, WsMessage>) {
        let mut rx = match self.take_outbox() {
            Some(rx) => rx,
            None => return,
        };
        let mut cancel = self.cancelled();
        let mut ticker = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // a close that raced the subscription above would never trip it
        if self.is_closed() {
            drain_and_close(&mut rx, &mut sink).await;
            return;
        }

        loop {
            tokio::select! {
                _ = cancel.changed() => {
                    // deliver what was queued before the close, then say goodbye
                    drain_and_close(&mut rx, &mut sink).await;
                    break;
                }
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        let write = async {
                            sink.feed(WsMessage::text(frame)).await?;
                            // drain whatever else is already queued
                            while let Ok(next) = rx.try_recv() {
                                sink.feed(WsMessage::text(next)).await?;
                            }
                            sink.flush().await
                        };
                        match timeout(WRITE_WAIT, write).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                debug!("client {}: write error: {}", self.user_id, e);
                                break;
                            }
                            Err(_) => {
                                debug!("client {}: write deadline expired", self.user_id);
                                break;
                            }
                        }
                    }
                    None => {
                        let _ = timeout(WRITE_WAIT, sink.send(WsMessage::close())).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let ping = timeout(WRITE_WAIT, sink.send(WsMessage::ping(Vec::new()))).await;
                    if !matches!(ping, Ok(Ok(()))) {
                        debug!("client {}: ping failed", self.user_id);
                        break;
                    }
                }
            }
        }

        self.close();
    }
}

/// Flushes already-queued frames best-effort, then emits a close frame
async fn drain_and_close(
    rx: &mut mpsc::Receiver<String>,
    sink: &mut SplitSink<WebSocket, WsMessage>,
) {
    while let Ok(frame) = rx.try_recv() {
        let sent = timeout(WRITE_WAIT, sink.send(WsMessage::text(frame))).await;
        if !matches!(sent, Ok(Ok(()))) {
            return;
        }
    }
    let _ = timeout(WRITE_WAIT, sink.send(WsMessage::close())).await;
}
