// Commands exposed to the front end. Every command reports failures as a
// user-facing string.

use crate::analysis;
use crate::config;
use crate::inventory::DashboardStats;
use crate::models::{AnalysisRequest, ChatMode, Equipment, GroundingSource, Message, RegistryCheckResult, Ticket, TicketPriority, TicketStatus};
use crate::state::AppState;
use chrono::Utc;
use uuid::Uuid;

/// Form data for a new maintenance ticket.
#[derive(Clone, Debug)]
pub struct NewTicket {
    pub equipment_id: String,
    pub title: String,
    pub description: String,
    pub reported_by: String,
    pub priority: TicketPriority,
    pub use_thinking: bool,
    pub image: Option<Vec<u8>>,
    pub mime_type: Option<String>,
}

// --- Inventory Commands ---

pub async fn list_equipment(state: &AppState) -> Vec<Equipment> {
    log::info!("Frontend requested to list equipment");
    state.inventory.lock().await.list_equipment().to_vec()
}

pub async fn search_equipment(state: &AppState, query: &str) -> Vec<Equipment> {
    log::debug!("Frontend searched equipment for: {}", query);
    let inventory = state.inventory.lock().await;
    inventory.search_equipment(query).into_iter().cloned().collect()
}

pub async fn dashboard_stats(state: &AppState) -> DashboardStats {
    state.inventory.lock().await.dashboard_stats()
}

pub async fn list_tickets(state: &AppState) -> Vec<Ticket> {
    log::info!("Frontend requested to list tickets");
    state.inventory.lock().await.list_tickets().to_vec()
}

// Creates a ticket and attaches an AI analysis of the reported issue
pub async fn create_ticket(state: &AppState, form: NewTicket) -> Result<Ticket, String> {
    log::info!("Frontend requested to create ticket for equipment {}", form.equipment_id);
    if form.equipment_id.trim().is_empty() || form.title.trim().is_empty() || form.description.trim().is_empty() {
        return Err("Equipment, title and description cannot be empty.".to_string());
    }

    let device_name = {
        let inventory = state.inventory.lock().await;
        match inventory.find_equipment(&form.equipment_id) {
            Some(equipment) => equipment.name.clone(),
            None => return Err(format!("Equipment {} not found", form.equipment_id)),
        }
    }; // Release lock before the API call

    let request = AnalysisRequest {
        title: form.title.clone(),
        description: form.description.clone(),
        device_name,
        use_thinking: form.use_thinking,
        image: form.image,
        mime_type: form.mime_type,
    };
    let analysis = analysis::analyze_ticket_issue(
        state.api_provider.as_ref(),
        &state.config.models,
        state.config.language,
        &request,
    )
    .await;

    let mut inventory = state.inventory.lock().await;
    let ticket = Ticket {
        id: inventory.next_ticket_id(),
        equipment_id: form.equipment_id,
        title: form.title,
        description: form.description,
        reported_by: form.reported_by,
        date_created: Utc::now().format("%Y-%m-%d").to_string(),
        priority: form.priority,
        status: TicketStatus::Open,
        ai_analysis: Some(analysis),
    };
    inventory.add_ticket(ticket.clone());
    Ok(ticket)
}

// Re-runs the issue analysis for an existing ticket
pub async fn analyze_ticket(state: &AppState, ticket_id: &str, use_thinking: bool) -> Result<String, String> {
    log::info!("Frontend requested analysis for ticket {}", ticket_id);
    let request = {
        let inventory = state.inventory.lock().await;
        let Some(ticket) = inventory.list_tickets().iter().find(|t| t.id == ticket_id) else {
            return Err(format!("Ticket {} not found", ticket_id));
        };
        let device_name = inventory
            .find_equipment(&ticket.equipment_id)
            .map(|e| e.name.clone())
            .unwrap_or_default();
        AnalysisRequest {
            title: ticket.title.clone(),
            description: ticket.description.clone(),
            device_name,
            use_thinking,
            image: None,
            mime_type: None,
        }
    };

    let analysis = analysis::analyze_ticket_issue(
        state.api_provider.as_ref(),
        &state.config.models,
        state.config.language,
        &request,
    )
    .await;
    state.inventory.lock().await.set_ticket_analysis(ticket_id, analysis.clone());
    Ok(analysis)
}

pub async fn check_registry(state: &AppState, equipment_id: &str) -> Result<RegistryCheckResult, String> {
    log::info!("Frontend requested registry check for equipment {}", equipment_id);
    let (name, serial_number) = {
        let inventory = state.inventory.lock().await;
        let Some(equipment) = inventory.find_equipment(equipment_id) else {
            return Err(format!("Equipment {} not found", equipment_id));
        };
        (equipment.name.clone(), equipment.serial_number.clone())
    };

    Ok(analysis::check_device_registry(
        state.api_provider.as_ref(),
        &state.config.models,
        state.config.language,
        &name,
        &serial_number,
    )
    .await)
}

// --- Assistant Commands ---

// Sends a chat message; the reply arrives as AssistantEvents
pub async fn send_message(state: &AppState, content: &str) -> Result<Message, String> {
    log::info!("Frontend requested to send message");
    if content.trim().is_empty() {
        return Err("Message cannot be empty.".to_string());
    }
    match state.submit(content).await {
        Some(turn) => Ok(turn.user_message),
        None => Err("A reply is still streaming; the message was not sent.".to_string()),
    }
}

pub async fn get_conversation_messages(state: &AppState) -> Vec<Message> {
    state.session.lock().await.messages().to_vec()
}

pub async fn get_turn_sources(state: &AppState) -> Vec<GroundingSource> {
    state.session.lock().await.turn_sources().to_vec()
}

pub async fn change_mode(state: &AppState, mode: &str) -> Result<ChatMode, String> {
    log::info!("Frontend requested to change assistant mode to: {}", mode);
    let mode: ChatMode = mode.parse()?;
    let mut session = state.session.lock().await;
    session
        .change_mode(mode)
        .map(|handle| handle.mode())
        .map_err(|e| e.to_string())
}

pub async fn reset_conversation(state: &AppState) {
    log::warn!("Frontend requested to reset the assistant conversation");
    state.session.lock().await.reset();
}

// Signals the stream for a specific assistant message to stop
pub async fn stop_generation(state: &AppState, message_id: &str) -> Result<(), String> {
    log::warn!("Frontend requested to stop generation for message ID: {}", message_id);

    let Ok(msg_uuid) = Uuid::parse_str(message_id) else {
        let err_msg = format!("Invalid message ID format for stop: {}", message_id);
        log::error!("{}", err_msg);
        return Err(err_msg);
    };

    state.stop_generation(msg_uuid).await.map_err(|e| e.to_string())
}

pub fn store_api_key(api_key: &str) -> Result<(), String> {
    if api_key.trim().is_empty() {
        return Err("API key cannot be empty.".to_string());
    }
    config::set_api_key_in_keyring(api_key.trim()).map_err(|e| format!("Failed to store API key: {:#}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{FragmentStream, GenerativeApiProvider, ServiceRequest, ServiceResponse};
    use crate::config::AppConfig;
    use crate::error::ServiceError;
    use crate::inventory::InventoryStore;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FixedReply(&'static str);

    #[async_trait]
    impl GenerativeApiProvider for FixedReply {
        async fn send_one_shot(&self, _model: &str, _request: &ServiceRequest) -> Result<ServiceResponse, ServiceError> {
            Ok(ServiceResponse { text: self.0.to_string(), sources: Vec::new() })
        }

        async fn send_streaming(&self, _model: &str, _request: &ServiceRequest) -> Result<FragmentStream, ServiceError> {
            Err(ServiceError::ServiceUnavailable("not scripted".to_string()))
        }
    }

    fn state() -> AppState {
        let (state, _events) = AppState::new(
            AppConfig::default(),
            InventoryStore::seeded(),
            Arc::new(FixedReply("Inspect the mixing unit.")),
        );
        state
    }

    fn form(equipment_id: &str) -> NewTicket {
        NewTicket {
            equipment_id: equipment_id.to_string(),
            title: "Alarm".to_string(),
            description: "Low pressure alarm".to_string(),
            reported_by: "Technician".to_string(),
            priority: TicketPriority::High,
            use_thinking: false,
            image: None,
            mime_type: None,
        }
    }

    #[tokio::test]
    async fn create_ticket_attaches_analysis() {
        let state = state();
        let ticket = create_ticket(&state, form("EQ-1002")).await.unwrap();
        assert_eq!(ticket.id, "TCK-504");
        assert_eq!(ticket.ai_analysis.as_deref(), Some("Inspect the mixing unit."));
        assert_eq!(list_tickets(&state).await[0].id, "TCK-504");
    }

    #[tokio::test]
    async fn create_ticket_validates_input() {
        let state = state();
        let mut bad = form("EQ-1002");
        bad.title = " ".to_string();
        assert!(create_ticket(&state, bad).await.is_err());
        assert!(create_ticket(&state, form("EQ-9999")).await.is_err());
        assert_eq!(list_tickets(&state).await.len(), 3);
    }

    #[tokio::test]
    async fn analyze_ticket_updates_stored_ticket() {
        let state = state();
        analyze_ticket(&state, "TCK-503", true).await.unwrap();
        let tickets = list_tickets(&state).await;
        let ticket = tickets.iter().find(|t| t.id == "TCK-503").unwrap();
        assert_eq!(ticket.ai_analysis.as_deref(), Some("Inspect the mixing unit."));
    }

    #[tokio::test]
    async fn registry_check_requires_known_equipment() {
        let state = state();
        assert!(check_registry(&state, "EQ-0000").await.is_err());
        let result = check_registry(&state, "EQ-1002").await.unwrap();
        assert_eq!(result.text, "Inspect the mixing unit.");
    }

    #[tokio::test]
    async fn change_mode_parses_and_applies() {
        let state = state();
        assert_eq!(change_mode(&state, "search").await.unwrap(), ChatMode::Search);
        assert!(change_mode(&state, "turbo").await.is_err());
        assert_eq!(state.session.lock().await.mode(), ChatMode::Search);
    }

    #[tokio::test]
    async fn stop_generation_rejects_ids_that_are_not_streaming() {
        let state = state();
        assert!(stop_generation(&state, "not-a-uuid").await.is_err());

        let id = Uuid::new_v4();
        assert!(stop_generation(&state, &id.to_string()).await.is_err());
        let welcome = get_conversation_messages(&state).await[0].id;
        assert!(stop_generation(&state, &welcome.to_string()).await.is_err());
        assert!(state.cancelled_streams.is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let state = state();
        assert!(send_message(&state, "   ").await.is_err());
        assert_eq!(get_conversation_messages(&state).await.len(), 1);
    }
}
