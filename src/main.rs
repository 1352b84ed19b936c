use agent_router::cli::{Cli, Commands};
use agent_router::config::read_agents_file;
use agent_router::observability::init_tracing;
use agent_router::protocol::agui::AgUiEncoder;
use agent_router::{utils, ChatMessage, ChatRequest, EventKind, RouterService, Settings};
use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use std::io::Write;
use tokio::io::{self, AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::new()?;
    init_tracing(&settings.logging);

    let cli = Cli::parse();
    let agents_path = cli
        .agents
        .clone()
        .unwrap_or_else(|| settings.server.agents_path.clone());

    match cli.command {
        Commands::Validate { file } => handle_validate(file.unwrap_or(agents_path)),
        Commands::Route { message, thread } => {
            let service = build_service(&settings, &agents_path).await?;
            handle_route(&service, thread, message).await
        }
        Commands::Chat {
            message,
            thread,
            raw,
        } => {
            let service = build_service(&settings, &agents_path).await?;
            handle_chat(&service, thread, message, raw).await
        }
        Commands::Interactive { thread } => {
            let service = build_service(&settings, &agents_path).await?;
            let thread = thread.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            handle_interactive(&service, thread).await
        }
    }
}

async fn build_service(settings: &Settings, agents_path: &str) -> Result<RouterService> {
    let registry = read_agents_file(agents_path)?;
    RouterService::from_settings(settings, registry).await
}

fn handle_validate(path: String) -> Result<()> {
    let registry = read_agents_file(&path)?;
    utils::print_registry(&registry);
    utils::print_success(&format!("\n{} is valid", path));
    Ok(())
}

async fn handle_route(service: &RouterService, thread: String, message: String) -> Result<()> {
    let request = ChatRequest::new(thread, vec![ChatMessage::user(message)]);
    let decision = service.route(&request).await?;
    utils::print_decision(&decision);
    Ok(())
}

async fn handle_chat(service: &RouterService, thread: String, message: String, raw: bool) -> Result<()> {
    let request = ChatRequest::new(thread, vec![ChatMessage::user(message)]);
    let decision = service.route(&request).await?;
    if !raw {
        utils::print_decision(&decision);
    }

    let mut encoder = AgUiEncoder::new(request.thread_id.clone());
    let mut stream = service.dispatch(&decision, request);
    while let Some(event) = stream.next().await {
        if raw {
            print!("{}", encoder.to_sse(&event));
            continue;
        }
        match &event.kind {
            EventKind::TextDelta { delta, .. } => {
                print!("{}", delta);
                std::io::stdout().flush()?;
            }
            EventKind::Error { class, message } => {
                println!();
                utils::print_error(&format!("[{}] {}", class.as_str(), message));
            }
            EventKind::EndOfTurn => println!(),
            EventKind::Marker { .. } => {}
        }
    }
    Ok(())
}

async fn handle_interactive(service: &RouterService, thread: String) -> Result<()> {
    utils::print_header("Interactive Mode");
    utils::print_info(&format!("Thread: {}", thread));
    utils::print_info("Type your messages (/exit to quit, Ctrl+C to abort)\n");

    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut history: Vec<ChatMessage> = Vec::new();

    loop {
        utils::print_prompt("You: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        if reader.read_line(&mut input).await? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input == "/exit" {
            break;
        }

        history.push(ChatMessage::user(input));
        let request = ChatRequest::new(thread.clone(), history.clone());
        let decision = match service.route(&request).await {
            Ok(decision) => decision,
            Err(e) => {
                utils::print_error(&e.to_string());
                history.pop();
                continue;
            }
        };
        utils::print_decision(&decision);

        let mut reply = String::new();
        let mut stream = service.dispatch(&decision, request);
        while let Some(event) = stream.next().await {
            match event.kind {
                EventKind::TextDelta { delta, .. } => {
                    print!("{}", delta);
                    std::io::stdout().flush()?;
                    reply.push_str(&delta);
                }
                EventKind::Error { class, message } => {
                    println!();
                    utils::print_error(&format!("[{}] {}", class.as_str(), message));
                }
                EventKind::EndOfTurn | EventKind::Marker { .. } => {}
            }
        }
        println!("\n");

        if !reply.is_empty() {
            history.push(ChatMessage::assistant(reply));
        }
    }

    Ok(())
}
