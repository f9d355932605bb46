//! Async event stream over a transport byte stream.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::{Stream, StreamExt};
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::events::DeckEvent;
use super::session::{DeckSession, SessionOptions, SessionState};
use crate::errors::{SlideStreamError, SlideStreamResult};
use crate::observability::MetricsCollector;
use crate::transport::ByteStream;
use crate::types::DeckDocument;

/// Error kind recorded for sessions whose consumer went away.
pub const CANCELLED_KIND: &str = "cancelled";

pin_project! {
    /// Stream of [`DeckEvent`]s produced from a provider response body.
    ///
    /// Each poll reads at most one transport chunk and runs it through the
    /// session synchronously, so there is a single suspension point per
    /// chunk. The sequence ends after the sentinel or an `error` event; the
    /// transport is not polled again after that. Dropping the stream drops
    /// the transport body.
    pub struct DeckEventStream {
        #[pin]
        inner: ByteStream,
        session: DeckSession,
        pending: VecDeque<DeckEvent>,
        finished: bool,
        started_at: Instant,
        metrics: Option<Arc<dyn MetricsCollector>>,
    }
}

impl DeckEventStream {
    /// Creates a stream with a fresh session.
    pub fn new(inner: ByteStream, options: SessionOptions) -> Self {
        Self::with_session(inner, DeckSession::new(options))
    }

    /// Creates a stream driving an existing session.
    pub fn with_session(inner: ByteStream, session: DeckSession) -> Self {
        tracing::debug!(session_id = %session.id(), "Session started");
        Self {
            inner,
            session,
            pending: VecDeque::new(),
            finished: false,
            started_at: Instant::now(),
            metrics: None,
        }
    }

    /// Reports the session outcome to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        metrics.record_session_started();
        self.metrics = Some(metrics);
        self
    }

    /// The underlying session.
    pub fn session(&self) -> &DeckSession {
        &self.session
    }

    /// Drives the session to the end and returns the reconciled document.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the session.
    pub async fn collect_document(mut self) -> SlideStreamResult<DeckDocument> {
        let mut document = None;
        while let Some(event) = self.next().await {
            if let DeckEvent::Complete { data } = event {
                document = Some(data);
            }
        }

        if let Some(error) = self.session.error() {
            return Err(error.clone());
        }
        document.ok_or_else(|| SlideStreamError::Stream {
            message: "stream ended without a complete document".to_string(),
        })
    }

    /// Renders every event as a server-sent event frame.
    pub fn into_sse_frames(self) -> impl Stream<Item = String> + Send {
        self.map(|event| event.to_sse_frame())
    }

    /// Runs the session in its own task, delivering events over a channel.
    ///
    /// The task stops reading from the transport as soon as the receiver is
    /// dropped, including while it is waiting for the next chunk.
    pub fn spawn(self, capacity: usize) -> (mpsc::Receiver<DeckEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(async move {
            let mut events = self;
            let session_id = events.session.id();
            loop {
                tokio::select! {
                    () = tx.closed() => {
                        tracing::debug!(%session_id, "Consumer went away, stopping session");
                        events.cancel();
                        break;
                    }
                    next = events.next() => {
                        let Some(event) = next else { break };
                        if tx.send(event).await.is_err() {
                            tracing::debug!(%session_id, "Consumer went away, stopping session");
                            events.cancel();
                            break;
                        }
                    }
                }
            }
        });
        (rx, handle)
    }

    /// Abandons a session that has not reached a terminal state and records
    /// it as a `cancelled` failure.
    fn cancel(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(metrics) = self.metrics.as_ref() {
            metrics.record_session_failed(CANCELLED_KIND, &self.session.stats());
        }
    }
}

impl Stream for DeckEventStream {
    type Item = DeckEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(event));
            }
            if *this.finished {
                return Poll::Ready(None);
            }

            let events = match this.inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(bytes))) => this.session.push_bytes(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    tracing::warn!(
                        session_id = %this.session.id(),
                        error = %e,
                        "Transport error mid-stream"
                    );
                    this.session.fail(e.into())
                }
                Poll::Ready(None) => this.session.finish(),
            };
            this.pending.extend(events);

            if this.session.is_terminal() {
                *this.finished = true;
                if let Some(metrics) = this.metrics.as_ref() {
                    report(metrics.as_ref(), this.session, *this.started_at);
                }
            }
        }
    }
}

fn report(metrics: &dyn MetricsCollector, session: &DeckSession, started_at: Instant) {
    let stats = session.stats();
    match session.state() {
        SessionState::Done => metrics.record_session_completed(&stats, started_at.elapsed()),
        _ => {
            let kind = session.error().map_or("unknown", SlideStreamError::kind);
            metrics.record_session_failed(kind, &stats);
        }
    }
}

impl std::fmt::Debug for DeckEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeckEventStream")
            .field("session", &self.session.id())
            .field("state", &self.session.state())
            .field("pending", &self.pending.len())
            .finish()
    }
}
