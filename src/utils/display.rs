use crate::agents::AgentRegistry;
use crate::routing::{RouteReason, RoutingDecision};
use colored::*;

pub fn print_header(text: &str) {
    println!("\n{}", text.bright_cyan().bold());
    println!("{}", "=".repeat(text.len()).bright_cyan());
}

pub fn print_success(text: &str) {
    println!("{}", text.green());
}

pub fn print_error(text: &str) {
    eprintln!("{}", text.red().bold());
}

pub fn print_info(text: &str) {
    println!("{}", text.blue());
}

pub fn print_prompt(text: &str) {
    print!("{}", text.yellow().bold());
}

pub fn print_decision(decision: &RoutingDecision) {
    let reason = match decision.reason {
        RouteReason::Mention => decision.reason.as_str().magenta(),
        RouteReason::Sticky => decision.reason.as_str().cyan(),
        RouteReason::Semantic => decision.reason.as_str().green(),
        RouteReason::LlmFallback => decision.reason.as_str().yellow(),
        RouteReason::Default => decision.reason.as_str().white(),
    };

    let mut line = format!("→ {} ({})", decision.agent_id.bold(), reason);
    if let Some(score) = decision.score {
        line.push_str(&format!(" score={:.3}", score));
    }
    if let Some(handle) = &decision.handle {
        line.push_str(&format!(" via @{}", handle));
    }
    if decision.topic_drift {
        line.push_str(&format!(" {}", "[topic drift]".red()));
    }
    println!("{}", line);

    if let Some(example) = &decision.matched_example {
        println!("  {} {}", "closest example:".dimmed(), example.dimmed());
    }
}

pub fn print_registry(registry: &AgentRegistry) {
    print_header(&format!("{} agents", registry.len()));
    for agent in registry.by_priority() {
        let marker = if registry.is_default(&agent.id) {
            " (default)".yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "{}{} [{}] {}",
            agent.id.bold(),
            marker,
            agent.protocol,
            agent.url
        );

        let handles: Vec<String> = agent.handles.iter().map(|h| format!("@{}", h)).collect();
        println!("  handles: {}", handles.join(", "));
        match &agent.routing {
            Some(routing) => println!(
                "  priority: {}  threshold: {:.2}  examples: {}",
                routing
                    .priority
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                routing.threshold,
                routing.examples.len()
            ),
            None => println!("  {}", "mention / fallback only".dimmed()),
        }
    }

    let policy = registry.session_policy();
    println!(
        "\nsessions: sticky={} timeout={}m drift={:.2}",
        policy.sticky_enabled,
        policy.timeout.as_secs() / 60,
        policy.topic_drift_threshold
    );
}
