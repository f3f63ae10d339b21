use crate::aggregator::{AggregateOutcome, AggregateStatus, StreamAggregator};
use crate::api::{GenerativeApiProvider, ResponseStream};
use crate::config::AppConfig;
use crate::error::SessionError;
use crate::inventory::InventoryStore;
use crate::models::{ChatMode, GroundingSource, Message};
use crate::session::{ConversationSession, TurnTicket};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Events pushed to the front end while a reply streams.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum AssistantEvent {
    #[serde(rename_all = "camelCase")]
    Chunk {
        message_id: Uuid,
        text: String,
        new_sources: Vec<GroundingSource>,
        is_first_chunk: bool,
    },
    #[serde(rename_all = "camelCase")]
    Finished {
        message_id: Uuid,
        text: String,
        sources: Vec<GroundingSource>,
        failed: bool,
        stopped: bool,
    },
}

/// A turn accepted by the session and running in the background.
pub struct SubmittedTurn {
    pub user_message: Message,
    pub assistant_message_id: Uuid,
    pub task: JoinHandle<AggregateOutcome>,
}

// Core application state shared by every command
#[derive(Clone)] // Allow cloning for background tasks
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub session: Arc<Mutex<ConversationSession>>,
    pub inventory: Arc<Mutex<InventoryStore>>,
    pub api_provider: Arc<dyn GenerativeApiProvider>, // Hold the trait object
    pub cancelled_streams: Arc<DashMap<Uuid, bool>>,  // Keyed by assistant message id
    events: mpsc::UnboundedSender<AssistantEvent>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        inventory: InventoryStore,
        api_provider: Arc<dyn GenerativeApiProvider>,
    ) -> (Self, mpsc::UnboundedReceiver<AssistantEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let session = ConversationSession::new(ChatMode::default(), config.language, config.history_policy);
        let state = Self {
            config: Arc::new(config),
            session: Arc::new(Mutex::new(session)),
            inventory: Arc::new(Mutex::new(inventory)),
            api_provider,
            cancelled_streams: Arc::new(DashMap::new()),
            events,
        };
        (state, receiver)
    }

    fn emit(&self, event: AssistantEvent) {
        // The receiver goes away when no view is listening; the turn still completes
        if self.events.send(event).is_err() {
            log::debug!("No listener for assistant events");
        }
    }

    /// Accepts a user turn and streams the reply on a background task.
    /// Returns `None` when the input was ignored (blank, or a turn is in flight).
    pub async fn submit(&self, text: &str) -> Option<SubmittedTurn> {
        let (ticket, user_message) = {
            let mut session = self.session.lock().await;
            let ticket = session.begin_turn(text)?;
            let user_message = session
                .messages()
                .iter()
                .rev()
                .find(|m| m.id == ticket.user_message_id)
                .cloned()?;
            (ticket, user_message)
        };

        let assistant_message_id = ticket.assistant_message_id;
        let state = self.clone();
        let task = tokio::spawn(async move { state.run_turn(ticket).await });

        Some(SubmittedTurn { user_message, assistant_message_id, task })
    }

    /// Streams one accepted turn to completion, stop request or failure.
    pub async fn run_turn(&self, ticket: TurnTicket) -> AggregateOutcome {
        let message_id = ticket.assistant_message_id;
        let model = self.config.models.model_for(ticket.tier).to_string();
        let mut aggregator = StreamAggregator::new();

        log::info!("BG Task [{}]: Starting stream request with {}", message_id, model);
        match self.api_provider.send_streaming(&model, &ticket.request).await {
            Ok(fragments) => {
                let mut stream = ResponseStream::new(fragments);
                let mut first_chunk = true;
                while let Some(fragment) = aggregator.next_fragment(&mut stream).await {
                    // >>> Check for cancellation request <<<
                    if self.cancelled_streams.remove(&message_id).is_some() {
                        log::warn!("BG Task [{}]: Cancellation requested. Stopping stream.", message_id);
                        aggregator.abandon(&mut stream);
                        break;
                    }

                    let update = aggregator.push(fragment);
                    let applied = self.session.lock().await.apply_update(&ticket, &update);
                    if !applied {
                        log::warn!("BG Task [{}]: Turn superseded. Abandoning stream.", message_id);
                        aggregator.abandon(&mut stream);
                        break;
                    }

                    self.emit(AssistantEvent::Chunk {
                        message_id,
                        text: update.accumulated_text,
                        new_sources: update.new_sources,
                        is_first_chunk: first_chunk,
                    });
                    first_chunk = false;
                }
            }
            Err(e) => {
                log::error!("BG Task [{}]: Failed to initiate stream request: {}", message_id, e);
                aggregator.record_failure(e);
            }
        }

        let outcome = aggregator.finish();

        let finished = {
            let mut session = self.session.lock().await;
            // Cleared under the session lock so a late stop request cannot leave an entry behind
            self.cancelled_streams.remove(&message_id);
            let language = session.language();
            if session.finish_turn(ticket, &outcome) {
                Some((outcome.display_text(language.phrases().chat_error), session.turn_sources().to_vec()))
            } else {
                None
            }
        };

        if let Some((text, sources)) = finished {
            self.emit(AssistantEvent::Finished {
                message_id,
                text,
                sources,
                failed: outcome.is_failure(),
                stopped: outcome.status == AggregateStatus::Abandoned,
            });
        }
        log::info!("BG Task [{}]: Finished with {} chars", message_id, outcome.text.len());
        outcome
    }

    /// Asks the stream producing `message_id` to stop at the next fragment.
    /// Only the reply that is currently streaming can be stopped.
    pub async fn stop_generation(&self, message_id: Uuid) -> Result<(), SessionError> {
        let session = self.session.lock().await;
        if session.streaming_message_id() != Some(message_id) {
            log::warn!("Ignoring stop request for message ID {}: not streaming", message_id);
            return Err(SessionError::NotStreaming(message_id));
        }
        self.cancelled_streams.insert(message_id, true);
        log::info!("Cancellation signal set for message ID: {}", message_id);
        Ok(())
    }
}
