//! Cancellable event streams.
//!
//! A producer task writes into a bounded channel; the consumer reads it as a
//! `Stream`. Dropping the consumer aborts the producer, which in turn drops
//! any in-flight backend request.

use crate::protocol::{EventKind, StreamEvent};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event stream consumer went away")]
pub struct Disconnected;

/// Write half. Assigns sequence numbers in emission order.
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    next_seq: u64,
}

impl EventSink {
    pub async fn emit(&mut self, agent_id: &str, kind: EventKind) -> Result<(), Disconnected> {
        let event = StreamEvent {
            agent_id: agent_id.to_string(),
            seq: self.next_seq,
            kind,
        };
        self.tx.send(event).await.map_err(|_| Disconnected)?;
        self.next_seq += 1;
        Ok(())
    }

    /// Resolves once the consumer has dropped its end.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
    producer: Option<JoinHandle<()>>,
}

impl EventStream {
    pub fn spawn<F, Fut>(buffer: usize, producer: F) -> Self
    where
        F: FnOnce(EventSink) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let task = tokio::spawn(producer(EventSink { tx, next_seq: 0 }));
        Self {
            rx,
            producer: Some(task),
        }
    }

    /// A finished stream holding `kinds`, all attributed to `agent_id`.
    pub fn from_events(agent_id: &str, kinds: Vec<EventKind>) -> Self {
        let (tx, rx) = mpsc::channel(kinds.len().max(1));
        for (seq, kind) in kinds.into_iter().enumerate() {
            let event = StreamEvent {
                agent_id: agent_id.to_string(),
                seq: seq as u64,
                kind,
            };
            if tx.try_send(event).is_err() {
                break;
            }
        }
        Self { rx, producer: None }
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(task) = self.producer.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_sequence_numbers_increase() {
        let stream = EventStream::spawn(4, |mut sink| async move {
            let _ = sink.emit("a", EventKind::text_delta("m", "x")).await;
            let _ = sink.emit("b", EventKind::EndOfTurn).await;
        });

        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].seq, events[0].agent_id.as_str()), (0, "a"));
        assert_eq!((events[1].seq, events[1].agent_id.as_str()), (1, "b"));
    }

    #[tokio::test]
    async fn test_from_events() {
        let stream = EventStream::from_events("a", vec![EventKind::EndOfTurn]);
        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(events, vec![StreamEvent { agent_id: "a".into(), seq: 0, kind: EventKind::EndOfTurn }]);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_producer() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();

        let mut stream = EventStream::spawn(1, move |mut sink| async move {
            let _guard = SetOnDrop(flag);
            loop {
                if sink.emit("a", EventKind::text_delta("m", "tick")).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });

        assert!(stream.next().await.is_some());
        drop(stream);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cancelled.load(Ordering::SeqCst));
    }
}
