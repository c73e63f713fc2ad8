//
// coordinator.rs
//
// Single-consumer message loop feeding the engine
//
// Events and commands are queued on an unbounded channel and handled one
// at a time, in arrival order, by a single tokio task. Browser calls made
// while handling one message can produce new events; those are queued
// behind whatever is already waiting.
//

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::{CommandOutcome, TabEngine};
use crate::events::{Command, RawTabEvent, TabEvent};

enum Message {
    Event(TabEvent),
    Command(Command, Option<oneshot::Sender<CommandOutcome>>),
    Flush(oneshot::Sender<()>),
}

/// Sending side of the coordinator. Clone freely.
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::UnboundedSender<Message>,
    token: CancellationToken,
    /// Messages queued but not yet fully handled
    pending: Arc<AtomicUsize>,
}

/// Receiving side, consumed by `run`.
pub struct Inbox {
    receiver: mpsc::UnboundedReceiver<Message>,
    token: CancellationToken,
    pending: Arc<AtomicUsize>,
}

/// Create a coordinator channel without starting the loop.
///
/// Useful when the browser handle needs the sender (to report its own
/// events) before the engine that wraps it exists.
pub fn channel() -> (CoordinatorHandle, Inbox) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let token = CancellationToken::new();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        CoordinatorHandle {
            sender,
            token: token.clone(),
            pending: pending.clone(),
        },
        Inbox {
            receiver,
            token,
            pending,
        },
    )
}

/// Start a coordinator for `engine`.
pub fn spawn(engine: TabEngine) -> (CoordinatorHandle, JoinHandle<()>) {
    let (handle, inbox) = channel();
    let join = inbox.spawn(engine);
    (handle, join)
}

impl Inbox {
    pub fn spawn(self, engine: TabEngine) -> JoinHandle<()> {
        tokio::spawn(self.run(engine))
    }

    /// Handle messages until cancelled or every sender is dropped.
    pub async fn run(mut self, engine: TabEngine) {
        log::info!("Coordinator started");

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    log::info!("Coordinator stopped");
                    break;
                }
                message = self.receiver.recv() => {
                    let Some(message) = message else {
                        log::info!("Coordinator channel closed");
                        break;
                    };
                    Self::handle(&engine, &self.pending, message).await;
                }
            }
        }
    }

    async fn handle(engine: &TabEngine, pending: &AtomicUsize, message: Message) {
        match message {
            Message::Event(event) => {
                log::trace!("Handling event for tab {}", event.tab_id());
                engine.handle_event(event).await;
            }
            Message::Command(command, reply) => {
                log::debug!("Handling command {:?}", command);
                let outcome = engine.handle_command(command).await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            Message::Flush(done) => {
                // Counted out before replying so a flusher sees only what is left.
                pending.fetch_sub(1, Ordering::SeqCst);
                let _ = done.send(());
                return;
            }
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CoordinatorHandle {
    /// Queue an event. Returns false once the coordinator has stopped.
    pub fn send_event(&self, event: TabEvent) -> bool {
        self.send(Message::Event(event))
    }

    /// Normalize and queue a host event; events about untrackable tabs are dropped.
    pub fn send_raw_event(&self, event: &RawTabEvent) -> bool {
        match event.normalize() {
            Some(event) => self.send_event(event),
            None => {
                log::debug!("Dropping event without a trackable tab: {:?}", event);
                true
            }
        }
    }

    pub fn send_command(&self, command: Command) -> bool {
        self.send(Message::Command(command, None))
    }

    /// Queue a command and wait for its outcome.
    pub async fn run_command(&self, command: Command) -> Option<CommandOutcome> {
        let (reply, outcome) = oneshot::channel();
        if !self.send(Message::Command(command, Some(reply))) {
            return None;
        }
        outcome.await.ok()
    }

    /// Wait until every message queued so far has been handled.
    pub async fn flush(&self) -> bool {
        let (done, flushed) = oneshot::channel();
        if !self.send(Message::Flush(done)) {
            return false;
        }
        flushed.await.is_ok()
    }

    /// Flush repeatedly until handling stops producing new messages.
    pub async fn settle(&self) -> bool {
        loop {
            if !self.flush().await {
                return false;
            }
            if self.pending.load(Ordering::SeqCst) == 0 {
                return true;
            }
        }
    }

    pub fn shutdown(&self) {
        log::info!("Shutting down coordinator");
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.sender.is_closed()
    }

    fn send(&self, message: Message) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(message).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }
}
