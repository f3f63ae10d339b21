use anyhow::{Context, Result};
use medequip_assistant::commands::{self, NewTicket};
use medequip_assistant::config::AppConfig;
use medequip_assistant::models::{Role, TicketPriority};
use medequip_assistant::state::{AppState, AssistantEvent};
use std::collections::HashMap;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

const HELP: &str = "\
Commands:
  /equipment [query]                       list or search devices
  /stats                                   dashboard figures
  /tickets                                 list maintenance tickets
  /ticket <equipment-id> <priority> <title> | <description> [--think] [--image <path>]
  /analyze <ticket-id> [--think]           re-run the issue analysis
  /registry <equipment-id>                 public registry lookup
  /mode <fast|search|thinking>             switch assistant mode
  /messages  /sources  /stop  /reset       conversation controls
  /set-key <api-key>                       store the API key in the OS keyring
  /quit
Anything else is sent to the assistant.";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    let config = AppConfig::from_env()?;
    let (state, events) = medequip_assistant::build_state(config)?;
    tokio::spawn(print_events(events));

    println!("{}", HELP);
    for message in commands::get_conversation_messages(&state).await {
        println!("assistant> {}", message.text);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read from stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = dispatch(&state, line).await {
            eprintln!("error: {}", e);
        }
    }
    Ok(())
}

async fn dispatch(state: &AppState, line: &str) -> Result<(), String> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match command {
        "/help" => println!("{}", HELP),
        "/equipment" => {
            for eq in commands::search_equipment(state, rest).await {
                println!("{}  {:<24} {:<12} {:?}  {}", eq.id, eq.name, eq.serial_number, eq.status, eq.location);
            }
        }
        "/stats" => {
            let stats = commands::dashboard_stats(state).await;
            println!("devices: {}  open tickets: {}", stats.total_equipment, stats.open_tickets);
            for (status, count) in stats.by_status {
                println!("  {:?}: {}", status, count);
            }
            for (city, count) in stats.devices_per_city {
                println!("  {}: {}", city, count);
            }
        }
        "/tickets" => {
            for ticket in commands::list_tickets(state).await {
                println!("{}  [{:?}/{:?}] {} ({})", ticket.id, ticket.priority, ticket.status, ticket.title, ticket.equipment_id);
                if let Some(analysis) = ticket.ai_analysis {
                    println!("    AI: {}", analysis);
                }
            }
        }
        "/ticket" => {
            let form = parse_ticket(rest).await?;
            let ticket = commands::create_ticket(state, form).await?;
            println!("created {}", ticket.id);
            if let Some(analysis) = ticket.ai_analysis {
                println!("{}", analysis);
            }
        }
        "/analyze" => {
            let use_thinking = rest.contains("--think");
            let ticket_id = rest.split_whitespace().next().ok_or("usage: /analyze <ticket-id> [--think]")?;
            println!("{}", commands::analyze_ticket(state, ticket_id, use_thinking).await?);
        }
        "/registry" => {
            let result = commands::check_registry(state, rest).await?;
            println!("{}", result.text);
            for source in result.sources {
                println!("  - {} <{}>", source.title, source.uri);
            }
        }
        "/mode" => {
            let mode = commands::change_mode(state, rest).await?;
            println!("mode: {}", mode);
        }
        "/messages" => {
            for message in commands::get_conversation_messages(state).await {
                let who = match message.role {
                    Role::User => "you",
                    Role::Assistant => "assistant",
                };
                println!("{}> {}", who, message.text);
            }
        }
        "/sources" => {
            for source in commands::get_turn_sources(state).await {
                println!("  - {} <{}>", source.title, source.uri);
            }
        }
        "/stop" => {
            let streaming = state.session.lock().await.streaming_message_id();
            match streaming {
                Some(id) => commands::stop_generation(state, &id.to_string()).await?,
                None => println!("nothing is streaming"),
            }
        }
        "/reset" => commands::reset_conversation(state).await,
        "/set-key" => {
            commands::store_api_key(rest)?;
            println!("API key stored");
        }
        _ if command.starts_with('/') => return Err(format!("unknown command {}, try /help", command)),
        _ => {
            commands::send_message(state, line).await?;
        }
    }
    Ok(())
}

// <equipment-id> <priority> <title> | <description> [--think] [--image <path>]
async fn parse_ticket(args: &str) -> Result<NewTicket, String> {
    const USAGE: &str = "usage: /ticket <equipment-id> <priority> <title> | <description> [--think] [--image <path>]";

    let (args, image_path) = match args.split_once("--image") {
        Some((head, path)) => (head, Some(path.trim())),
        None => (args, None),
    };
    let use_thinking = args.contains("--think");
    let args = args.replace("--think", "");

    let mut head = args.splitn(3, ' ');
    let equipment_id = head.next().unwrap_or_default().trim().to_string();
    let priority: TicketPriority = head.next().ok_or(USAGE)?.parse()?;
    let (title, description) = head.next().and_then(|r| r.split_once('|')).ok_or(USAGE)?;

    let (image, mime_type) = match image_path.filter(|p| !p.is_empty()) {
        Some(path) => {
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| format!("Failed to read image {}: {}", path, e))?;
            (Some(data), Some(mime_type_for(path).to_string()))
        }
        None => (None, None),
    };

    Ok(NewTicket {
        equipment_id,
        title: title.trim().to_string(),
        description: description.trim().to_string(),
        reported_by: "Current user".to_string(),
        priority,
        use_thinking,
        image,
        mime_type,
    })
}

fn mime_type_for(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

// Prints streamed replies as they grow
async fn print_events(mut events: UnboundedReceiver<AssistantEvent>) {
    let mut printed: HashMap<uuid::Uuid, usize> = HashMap::new();
    while let Some(event) = events.recv().await {
        match event {
            AssistantEvent::Chunk { message_id, text, is_first_chunk, .. } => {
                let done = printed.entry(message_id).or_insert(0);
                if is_first_chunk {
                    print!("assistant> ");
                }
                print!("{}", text.get(*done..).unwrap_or_default());
                *done = text.len();
                let _ = std::io::stdout().flush();
            }
            AssistantEvent::Finished { message_id, text, sources, stopped, .. } => {
                match printed.remove(&message_id) {
                    Some(_) => println!(),
                    None => println!("assistant> {}", text),
                }
                if stopped {
                    println!("(stopped)");
                }
                for source in sources {
                    println!("  - {} <{}>", source.title, source.uri);
                }
            }
        }
    }
}
