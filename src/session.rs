//! Conversation state for the technician assistant: the message log, the
//! Idle/Sending machine and the binding to the external chat session.

use crate::aggregator::{AggregateOutcome, AggregateStatus, SourceSet, StreamUpdate};
use crate::api::{Content, ServiceRequest};
use crate::error::SessionError;
use crate::models::{ChatMode, GroundingSource, Message, Role};
use crate::prompt::{self, WorkingLanguage};
use crate::router::{self, Capability, ModelTier, RequestConfig, SelectionOptions};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// What happens to earlier turns when the chat binding is replaced on a mode change.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HistoryPolicy {
    /// The new binding starts without context; the log is only kept for display.
    #[default]
    Reset,
    /// Completed turns from the log are replayed into the new binding.
    Replay,
}

impl FromStr for HistoryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reset" => Ok(HistoryPolicy::Reset),
            "replay" => Ok(HistoryPolicy::Replay),
            other => Err(format!("Unknown history policy: {}", other)),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendState {
    Idle,
    Sending,
}

/// Binding to one external chat session: model, config and the context sent with each turn.
#[derive(Clone, Debug)]
pub struct ChatHandle {
    id: Uuid,
    mode: ChatMode,
    tier: ModelTier,
    config: RequestConfig,
    history: Vec<Content>,
}

impl ChatHandle {
    fn new(mode: ChatMode, language: WorkingLanguage) -> Self {
        let selection = router::select_configuration(Capability::for_mode(mode), SelectionOptions::default());
        let mut config = selection.config;
        config.system_instruction = Some(prompt::chat_system_instruction(language));
        Self {
            id: Uuid::new_v4(),
            mode,
            tier: selection.tier,
            config,
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn tier(&self) -> ModelTier {
        self.tier
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    fn request_for(&self, text: &str) -> ServiceRequest {
        let mut contents = self.history.clone();
        contents.push(Content::user(prompt::build_chat_turn(text)));
        ServiceRequest {
            contents,
            config: self.config.clone(),
        }
    }

    fn record_exchange(&mut self, user_text: &str, reply: &str) {
        self.history.push(Content::user(prompt::build_chat_turn(user_text)));
        self.history.push(Content::model_text(reply));
    }
}

/// Everything needed to run one accepted turn without holding the session.
#[derive(Debug)]
pub struct TurnTicket {
    turn_id: Uuid,
    handle_id: Uuid,
    user_text: String,
    pub user_message_id: Uuid,
    pub assistant_message_id: Uuid,
    pub tier: ModelTier,
    pub request: ServiceRequest,
}

// The turn currently allowed to write into the log
#[derive(Clone, Copy, Debug)]
struct ActiveTurn {
    turn_id: Uuid,
    assistant_message_id: Uuid,
}

pub struct ConversationSession {
    messages: Vec<Message>,
    mode: ChatMode,
    language: WorkingLanguage,
    history_policy: HistoryPolicy,
    handle: ChatHandle,
    state: SendState,
    active_turn: Option<ActiveTurn>,
    turn_sources: SourceSet,
}

impl ConversationSession {
    pub fn new(mode: ChatMode, language: WorkingLanguage, history_policy: HistoryPolicy) -> Self {
        log::info!("Opening assistant session in {} mode", mode);
        Self {
            messages: vec![Message::new(Role::Assistant, language.phrases().welcome)],
            mode,
            language,
            history_policy,
            handle: ChatHandle::new(mode, language),
            state: SendState::Idle,
            active_turn: None,
            turn_sources: SourceSet::default(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn language(&self) -> WorkingLanguage {
        self.language
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    pub fn is_sending(&self) -> bool {
        self.state == SendState::Sending
    }

    pub fn handle(&self) -> &ChatHandle {
        &self.handle
    }

    /// Assistant message that is currently being streamed, if any.
    pub fn streaming_message_id(&self) -> Option<Uuid> {
        self.active_turn.map(|turn| turn.assistant_message_id)
    }

    /// Citations gathered for the current (or last) turn.
    pub fn turn_sources(&self) -> &[GroundingSource] {
        self.turn_sources.as_slice()
    }

    /// Accepts a user turn. Blank input, or any input while a reply is
    /// streaming, is ignored and yields `None`.
    pub fn begin_turn(&mut self, text: &str) -> Option<TurnTicket> {
        if text.trim().is_empty() {
            log::debug!("Ignoring empty user input");
            return None;
        }
        if self.is_sending() {
            log::warn!("Ignoring user input while a reply is still streaming");
            return None;
        }

        let user_message = Message::new(Role::User, text);
        let user_message_id = user_message.id;
        self.messages.push(user_message);
        self.turn_sources.clear();

        let request = self.handle.request_for(text);
        let placeholder = Message::new(Role::Assistant, "");
        let assistant_message_id = placeholder.id;
        self.messages.push(placeholder);

        let turn_id = Uuid::new_v4();
        self.state = SendState::Sending;
        self.active_turn = Some(ActiveTurn { turn_id, assistant_message_id });
        log::info!("Turn {} started, assistant message {}", turn_id, assistant_message_id);

        Some(TurnTicket {
            turn_id,
            handle_id: self.handle.id,
            user_text: text.to_string(),
            user_message_id,
            assistant_message_id,
            tier: self.handle.tier,
            request,
        })
    }

    fn is_current(&self, ticket: &TurnTicket) -> bool {
        self.active_turn.is_some_and(|turn| turn.turn_id == ticket.turn_id) && self.handle.id == ticket.handle_id
    }

    fn message_mut(&mut self, id: Uuid) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    /// Grows the streaming assistant message. Returns `false` when the turn
    /// was superseded and the update was dropped.
    pub fn apply_update(&mut self, ticket: &TurnTicket, update: &StreamUpdate) -> bool {
        if !self.is_current(ticket) {
            log::debug!("Dropping late fragment for superseded turn {}", ticket.turn_id);
            return false;
        }
        if let Some(message) = self.message_mut(ticket.assistant_message_id) {
            message.text.clone_from(&update.accumulated_text);
        }
        self.turn_sources.extend_new(update.new_sources.iter().cloned());
        true
    }

    /// Writes the final reply and returns to `Idle`. Returns `false` for a
    /// superseded turn, which leaves the session untouched.
    pub fn finish_turn(&mut self, ticket: TurnTicket, outcome: &AggregateOutcome) -> bool {
        if !self.is_current(&ticket) {
            log::debug!("Ignoring completion of superseded turn {}", ticket.turn_id);
            return false;
        }

        let text = outcome.display_text(self.language.phrases().chat_error);
        if let Some(message) = self.message_mut(ticket.assistant_message_id) {
            message.text.clone_from(&text);
        }
        self.turn_sources.extend_new(outcome.sources.iter().cloned());

        // A failed turn with no reply leaves the chat context unchanged
        let reply_received = !outcome.text.is_empty();
        if reply_received {
            self.handle.record_exchange(&ticket.user_text, &outcome.text);
        }

        match &outcome.status {
            AggregateStatus::Completed => log::info!("Turn {} completed", ticket.turn_id),
            AggregateStatus::Abandoned => log::warn!("Turn {} stopped before completion", ticket.turn_id),
            AggregateStatus::Failed(err) => log::error!("Turn {} failed: {}", ticket.turn_id, err),
        }

        self.state = SendState::Idle;
        self.active_turn = None;
        true
    }

    /// Rebinds the session to `mode`. Only allowed while idle; the message log is kept.
    pub fn change_mode(&mut self, mode: ChatMode) -> Result<&ChatHandle, SessionError> {
        if self.is_sending() {
            return Err(SessionError::TurnInFlight);
        }
        if mode == self.mode {
            return Ok(&self.handle);
        }

        let mut handle = ChatHandle::new(mode, self.language);
        if self.history_policy == HistoryPolicy::Replay {
            handle.history = self.replayable_history();
        }
        log::info!(
            "Switching assistant from {} to {} mode (binding {} -> {}, {} context turns)",
            self.mode,
            mode,
            self.handle.id,
            handle.id,
            handle.history.len()
        );
        self.handle = handle;
        self.mode = mode;
        Ok(&self.handle)
    }

    /// Drops any in-flight turn and starts a fresh binding in the current
    /// mode. Fragments that arrive afterwards for the old turn are ignored.
    pub fn reset(&mut self) -> &ChatHandle {
        if let Some(turn) = self.active_turn.take() {
            log::warn!("Resetting session with turn {} still in flight", turn.turn_id);
            let stopped = self.language.phrases().reply_stopped;
            if let Some(message) = self.message_mut(turn.assistant_message_id) {
                if message.text.is_empty() {
                    message.text = stopped.to_string();
                }
            }
        }
        self.state = SendState::Idle;
        self.turn_sources.clear();
        self.handle = ChatHandle::new(self.mode, self.language);
        &self.handle
    }

    // Completed user/assistant pairs, skipping the greeting and empty replies
    fn replayable_history(&self) -> Vec<Content> {
        let mut history = Vec::new();
        let mut pending_user: Option<&str> = None;
        for message in &self.messages {
            match message.role {
                Role::User => pending_user = Some(message.text.as_str()),
                Role::Assistant => {
                    if let Some(user_text) = pending_user.take() {
                        if !message.text.is_empty() {
                            history.push(Content::user(prompt::build_chat_turn(user_text)));
                            history.push(Content::model_text(message.text.clone()));
                        }
                    }
                }
            }
        }
        history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ContentRole;
    use crate::error::ServiceError;
    use crate::router::REASONING_BUDGET;

    fn session() -> ConversationSession {
        ConversationSession::new(ChatMode::Fast, WorkingLanguage::Arabic, HistoryPolicy::Reset)
    }

    fn update(text: &str) -> StreamUpdate {
        StreamUpdate { accumulated_text: text.to_string(), new_sources: Vec::new() }
    }

    fn completed(text: &str) -> AggregateOutcome {
        AggregateOutcome {
            text: text.to_string(),
            sources: Vec::new(),
            status: AggregateStatus::Completed,
            fragments_received: 1,
        }
    }

    #[test]
    fn new_session_greets() {
        let s = session();
        assert_eq!(s.messages().len(), 1);
        assert_eq!(s.messages()[0].role, Role::Assistant);
        assert_eq!(s.state(), SendState::Idle);
    }

    #[test]
    fn begin_turn_appends_user_and_placeholder() {
        let mut s = session();
        let ticket = s.begin_turn("الجهاز لا يعمل").unwrap();
        let messages = s.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].text, "الجهاز لا يعمل");
        assert_eq!(messages[2].id, ticket.assistant_message_id);
        assert_eq!(messages[2].text, "");
        assert!(s.is_sending());
        assert_eq!(ticket.tier, ModelTier::Lite);
        assert!(ticket.request.config.tools.is_empty());
    }

    #[test]
    fn second_submit_while_sending_is_ignored() {
        let mut s = session();
        let _ticket = s.begin_turn("first").unwrap();
        assert!(s.begin_turn("second").is_none());
        assert_eq!(s.messages().len(), 3);
    }

    #[test]
    fn blank_input_is_ignored() {
        let mut s = session();
        assert!(s.begin_turn("   ").is_none());
        assert_eq!(s.state(), SendState::Idle);
        assert_eq!(s.messages().len(), 1);
    }

    #[test]
    fn updates_grow_message_and_finish_returns_to_idle() {
        let mut s = session();
        let ticket = s.begin_turn("hello").unwrap();
        assert!(s.apply_update(&ticket, &update("Hi")));
        assert_eq!(s.messages()[2].text, "Hi");
        assert!(s.apply_update(&ticket, &update("Hi there")));
        assert!(s.finish_turn(ticket, &completed("Hi there")));
        assert_eq!(s.messages()[2].text, "Hi there");
        assert_eq!(s.state(), SendState::Idle);
        assert_eq!(s.handle().history().len(), 2);
    }

    #[test]
    fn failed_turn_without_text_shows_fallback() {
        let mut s = session();
        let ticket = s.begin_turn("hello").unwrap();
        let outcome = AggregateOutcome {
            text: String::new(),
            sources: Vec::new(),
            status: AggregateStatus::Failed(ServiceError::ServiceUnavailable("down".into())),
            fragments_received: 0,
        };
        assert!(s.finish_turn(ticket, &outcome));
        assert_eq!(s.messages()[2].text, WorkingLanguage::Arabic.phrases().chat_error);
        assert!(s.handle().history().is_empty());
        assert!(s.begin_turn("again").is_some());
    }

    #[test]
    fn sources_reset_on_new_turn() {
        let mut s = session();
        let ticket = s.begin_turn("q1").unwrap();
        let source = GroundingSource { title: "t".into(), uri: "https://x".into() };
        let first = StreamUpdate { accumulated_text: "a".into(), new_sources: vec![source.clone()] };
        s.apply_update(&ticket, &first);
        assert_eq!(s.turn_sources(), &[source][..]);
        s.finish_turn(ticket, &completed("a"));

        let _next = s.begin_turn("q2").unwrap();
        assert!(s.turn_sources().is_empty());
    }

    #[test]
    fn mode_change_keeps_log_and_replaces_binding() {
        let mut s = session();
        let ticket = s.begin_turn("hello").unwrap();
        s.finish_turn(ticket, &completed("hi"));
        let before_id = s.handle().id();
        let before_len = s.messages().len();

        let handle = s.change_mode(ChatMode::Thinking).unwrap();
        assert_ne!(handle.id(), before_id);
        assert_eq!(handle.tier(), ModelTier::Advanced);
        assert_eq!(handle.config().reasoning_budget, Some(REASONING_BUDGET));
        assert!(handle.history().is_empty());
        assert_eq!(s.messages().len(), before_len);
        assert_eq!(s.mode(), ChatMode::Thinking);
    }

    #[test]
    fn mode_change_rejected_while_sending() {
        let mut s = session();
        let _ticket = s.begin_turn("hello").unwrap();
        assert_eq!(s.change_mode(ChatMode::Search).unwrap_err(), SessionError::TurnInFlight);
        assert_eq!(s.mode(), ChatMode::Fast);
    }

    #[test]
    fn replay_policy_seeds_new_binding() {
        let mut s = ConversationSession::new(ChatMode::Fast, WorkingLanguage::English, HistoryPolicy::Replay);
        let ticket = s.begin_turn("pump alarm").unwrap();
        s.finish_turn(ticket, &completed("check the occlusion sensor"));

        let handle = s.change_mode(ChatMode::Search).unwrap();
        let roles: Vec<_> = handle.history().iter().map(|c| c.role).collect();
        assert_eq!(roles, [ContentRole::User, ContentRole::Model]);
        assert!(handle.config().has_search_grounding());
    }

    #[test]
    fn reset_supersedes_in_flight_turn() {
        let mut s = session();
        let ticket = s.begin_turn("hello").unwrap();
        s.apply_update(&ticket, &update("par"));
        s.reset();

        assert_eq!(s.state(), SendState::Idle);
        assert!(!s.apply_update(&ticket, &update("partial late")));
        assert!(!s.finish_turn(ticket, &completed("partial late")));
        assert_eq!(s.messages()[2].text, "par");
        assert!(s.begin_turn("fresh").is_some());
    }

    #[test]
    fn reset_before_first_fragment_marks_placeholder_stopped() {
        let mut s = session();
        let ticket = s.begin_turn("hello").unwrap();
        assert_eq!(s.streaming_message_id(), Some(ticket.assistant_message_id));
        s.reset();

        assert_eq!(s.streaming_message_id(), None);
        assert_eq!(s.messages()[2].text, WorkingLanguage::Arabic.phrases().reply_stopped);
        assert!(!s.finish_turn(ticket, &completed("")));
        assert_eq!(s.messages()[2].text, WorkingLanguage::Arabic.phrases().reply_stopped);
    }

    #[test]
    fn request_carries_context_and_instruction() {
        let mut s = session();
        let ticket = s.begin_turn("one").unwrap();
        s.finish_turn(ticket, &completed("reply one"));
        let ticket = s.begin_turn("two").unwrap();
        assert_eq!(ticket.request.contents.len(), 3);
        assert!(ticket.request.config.system_instruction.is_some());
    }
}
