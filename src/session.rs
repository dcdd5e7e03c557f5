//! Conversation state and the bridge between a provider's event source and the
//! single-threaded interaction loop.
//!
//! The loop awaits [`Session::next_event`] (its only suspension point) next to its other
//! event sources, then hands the result to the synchronous [`Session::apply`]. A turn is
//! finalized by whichever of a terminal event or [`Session::cancel`] is applied first; the
//! other becomes a no-op.

use crate::provider::{ChatMessage, ChatRequest, EventSource, Provider, ProviderError, StreamEvent};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub enum Entry {
    Message(ChatMessage),
    /// A failed turn, shown in place of the assistant reply.
    Error(String),
    /// Status lines (cancellation, command feedback). Never sent to the provider.
    Notice(String),
}

#[derive(Debug, Clone, Default)]
pub struct TurnSettings {
    /// Empty means the provider's configured model.
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// An event tagged with the turn it belongs to.
#[derive(Debug)]
pub struct TurnEvent {
    turn: u64,
    event: Option<StreamEvent>,
}

/// How a turn ended.
#[derive(Debug, Clone)]
pub enum Finalization {
    Completed(String),
    Failed(ProviderError),
    Cancelled { partial: String },
}

#[derive(Debug)]
pub enum Update {
    /// A fragment was appended to the in-progress reply.
    Appended(String),
    Finished(Finalization),
    /// The event belonged to a turn that is already finalized.
    Stale,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("a response is still streaming")]
    Busy,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

struct ActiveTurn {
    id: u64,
    source: EventSource,
    cancel: CancellationToken,
    buffer: String,
}

impl Drop for ActiveTurn {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct Session {
    provider: Arc<dyn Provider>,
    settings: TurnSettings,
    entries: Vec<Entry>,
    turn: Option<ActiveTurn>,
    next_id: u64,
    /// Readers of finalized turns, awaited on shutdown.
    retired: Vec<JoinHandle<()>>,
}

impl Session {
    pub fn new(provider: Arc<dyn Provider>, settings: TurnSettings) -> Self {
        Self {
            provider,
            settings,
            entries: Vec::new(),
            turn: None,
            next_id: 0,
            retired: Vec::new(),
        }
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn is_streaming(&self) -> bool {
        self.turn.is_some()
    }

    /// Reply text received so far for the active turn.
    pub fn pending(&self) -> Option<&str> {
        self.turn.as_ref().map(|t| t.buffer.as_str())
    }

    /// Model sent with each request; the provider default is used when empty.
    pub fn model(&self) -> &str {
        if self.settings.model.is_empty() {
            self.provider.model()
        } else {
            &self.settings.model
        }
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.settings.model = model.into();
    }

    pub fn notice(&mut self, text: impl Into<String>) {
        self.entries.push(Entry::Notice(text.into()));
    }

    /// Drop all history, cancelling the active turn if there is one.
    pub fn clear(&mut self) {
        self.cancel();
        self.entries.clear();
    }

    /// The message list a request for the next turn would carry.
    pub fn history(&self) -> Vec<ChatMessage> {
        let system = self
            .settings
            .system_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(ChatMessage::system);

        system
            .into_iter()
            .chain(self.entries.iter().filter_map(|e| match e {
                Entry::Message(m) => Some(m.clone()),
                _ => None,
            }))
            .collect()
    }

    /// Record `prompt` as a user message and start streaming the reply.
    pub fn begin(&mut self, prompt: impl Into<String>) -> Result<(), TurnError> {
        if self.turn.is_some() {
            return Err(TurnError::Busy);
        }

        self.entries.push(Entry::Message(ChatMessage::user(prompt)));
        let req = ChatRequest {
            model: self.settings.model.clone(),
            messages: self.history(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            stream: true,
        };

        let cancel = CancellationToken::new();
        let source = match self.provider.stream(req, cancel.clone()) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(error = %e, "failed to start stream");
                self.entries.push(Entry::Error(e.to_string()));
                return Err(e.into());
            }
        };

        self.next_id += 1;
        tracing::debug!(turn = self.next_id, provider = self.provider.name(), "turn started");
        self.turn = Some(ActiveTurn {
            id: self.next_id,
            source,
            cancel,
            buffer: String::new(),
        });
        Ok(())
    }

    /// Wait for the active turn's next event. Pends forever while idle.
    ///
    /// Cancel-safe: dropping the future loses no event.
    pub async fn next_event(&mut self) -> TurnEvent {
        match self.turn.as_mut() {
            Some(turn) => TurnEvent {
                turn: turn.id,
                event: turn.source.recv().await,
            },
            None => std::future::pending().await,
        }
    }

    pub fn apply(&mut self, ev: TurnEvent) -> Update {
        let Some(turn) = self.turn.as_mut().filter(|t| t.id == ev.turn) else {
            tracing::trace!(turn = ev.turn, "ignoring event for finalized turn");
            return Update::Stale;
        };

        let outcome = match ev.event {
            Some(StreamEvent::Chunk(text)) => {
                turn.buffer.push_str(&text);
                return Update::Appended(text);
            }
            Some(StreamEvent::Done) => Outcome::Done,
            Some(StreamEvent::Error(e)) => Outcome::Failed(e),
            // Closed without a terminal event: the token was cancelled elsewhere.
            None => Outcome::Cancelled,
        };
        Update::Finished(self.finalize(outcome))
    }

    /// Cancel the active turn. Returns `None` if it was already finalized.
    pub fn cancel(&mut self) -> Option<Finalization> {
        if self.turn.is_none() {
            return None;
        }
        Some(self.finalize(Outcome::Cancelled))
    }

    /// Cancel the active turn and wait for every reader task to exit.
    pub async fn shutdown(&mut self) {
        self.cancel();
        for handle in self.retired.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "stream reader task failed");
            }
        }
    }

    fn finalize(&mut self, outcome: Outcome) -> Finalization {
        let Some(mut turn) = self.turn.take() else {
            unreachable!("finalize requires an active turn");
        };
        turn.cancel.cancel();
        self.retired.retain(|h| !h.is_finished());
        if let Some(handle) = turn.source.take_reader() {
            self.retired.push(handle);
        }

        let text = std::mem::take(&mut turn.buffer);
        let fin = match outcome {
            Outcome::Done => {
                self.entries.push(Entry::Message(ChatMessage::assistant(text.clone())));
                Finalization::Completed(text)
            }
            Outcome::Failed(e) => {
                tracing::warn!(turn = turn.id, error = %e, "turn failed");
                self.entries.push(Entry::Error(e.to_string()));
                Finalization::Failed(e)
            }
            Outcome::Cancelled => {
                self.entries.push(Entry::Notice("(cancelled)".to_string()));
                Finalization::Cancelled { partial: text }
            }
        };
        tracing::debug!(turn = turn.id, "turn finalized");
        fin
    }
}

enum Outcome {
    Done,
    Failed(ProviderError),
    Cancelled,
}
