//! Ordered, single-consumer stream of loop events

use crate::state_machine::StreamEvent;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EmitError {
    #[error("stream already closed")]
    Closed,
    #[error("stream consumer disconnected")]
    Disconnected,
}

/// Write side of a loop's event stream.
///
/// The channel closes exactly once: right after a terminal event
/// (`done` or `error`) is pushed, or when the consumer goes away.
#[derive(Debug)]
pub struct EventEmitter {
    tx: Option<mpsc::Sender<StreamEvent>>,
}

impl EventEmitter {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    pub async fn emit(&mut self, event: StreamEvent) -> Result<(), EmitError> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(EmitError::Closed);
        };
        let terminal = event.is_terminal();
        let result = tx.send(event).await.map_err(|_| EmitError::Disconnected);
        if terminal || result.is_err() {
            self.tx = None;
        }
        result
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// The consumer dropped its receiver
    pub fn is_disconnected(&self) -> bool {
        self.tx.as_ref().is_some_and(mpsc::Sender::is_closed)
    }

    /// Resolves once the consumer drops its receiver. Never resolves after close.
    pub async fn disconnected(&self) {
        match self.tx.as_ref() {
            Some(tx) => tx.closed().await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order_and_close_after_done() {
        let (mut emitter, mut rx) = EventEmitter::channel(8);
        emitter.emit(StreamEvent::Text { text: "a".into() }).await.unwrap();
        emitter.emit(StreamEvent::Text { text: "b".into() }).await.unwrap();
        emitter
            .emit(StreamEvent::Done {
                conversation_id: "c1".into(),
            })
            .await
            .unwrap();

        assert!(emitter.is_closed());
        assert_eq!(
            emitter.emit(StreamEvent::Text { text: "late".into() }).await,
            Err(EmitError::Closed)
        );

        let mut names = vec![];
        while let Some(event) = rx.recv().await {
            names.push(event.name());
        }
        assert_eq!(names, vec!["text", "text", "done"]);
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let (mut emitter, mut rx) = EventEmitter::channel(8);
        emitter.emit(StreamEvent::error("boom")).await.unwrap();
        assert!(emitter.is_closed());
        assert_eq!(rx.recv().await, Some(StreamEvent::error("boom")));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_disconnected() {
        let (mut emitter, rx) = EventEmitter::channel(8);
        drop(rx);
        assert!(emitter.is_disconnected());
        assert_eq!(
            emitter.emit(StreamEvent::Text { text: "x".into() }).await,
            Err(EmitError::Disconnected)
        );
        assert!(emitter.is_closed());
    }
}
