use std::env;
use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use reflectllm::clients::ollama::{OllamaClient, DEFAULT_BASE_URL};
use reflectllm::config::{Preset, ReflectionConfig};
use reflectllm::Orchestrator;

// Run from the root folder of the repo as follows:
// RUST_LOG=info OLLAMA_BASE_URL=http://localhost:11434 cargo run --example refine_query -- research
//
// The preset argument is optional (research, creative, technical, quick, thorough).
// RUST_LOG=info shows each answer and critique as the loop runs; the history is
// printed after the run either way when the config is verbose.

const EXAMPLE_QUERIES: [&str; 3] = [
    "Explain the key principles of quantum computing in simple terms.",
    "What are the main differences between supervised and unsupervised learning?",
    "How can I optimize Python code for better performance?",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    reflectllm::init_logger();

    let base_url = env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
    let mut config = ReflectionConfig::default().with_base_url(base_url);
    if let Some(name) = env::args().nth(1) {
        let preset: Preset = name.parse()?;
        println!("Using preset '{}' (focus: {})", preset, preset.focus());
        config = config.with_preset(preset);
    }

    let client = Arc::new(OllamaClient::from_config(&config));
    let mut orchestrator = Orchestrator::from_config(client, &config);

    println!("Dual-agent refinement via Ollama at {}", config.base_url);
    let report = orchestrator.check_prerequisites().await;
    if !report.backend_reachable {
        println!("Ollama is not running!");
        println!("Please start Ollama with 'ollama serve' and try again.");
        return Ok(());
    }
    println!("Ollama is running");
    if !report.missing_models.is_empty() {
        for model in &report.missing_models {
            println!("Model {} not found, pull it with 'ollama pull {}'", model, model);
        }
        return Ok(());
    }

    let query = match choose_query()? {
        Some(query) => query,
        None => return Ok(()),
    };

    println!("\n{}\n", "=".repeat(70));
    let result = orchestrator
        .run(&query, config.max_iterations, config.verbose)
        .await;
    println!("\n{}\n", "=".repeat(70));

    println!("Processing Complete!\n");
    println!("Iterations: {}", result.iterations);
    println!("Converged: {}", if result.converged { "Yes" } else { "No" });
    println!("Generator Calls: {}", result.generator_calls);
    println!("Critic Calls: {}", result.critic_calls);
    if result.backend_failures > 0 {
        println!("Backend Failures: {}", result.backend_failures);
    }
    if result.total_tokens_used > 0 {
        println!("Tokens Used: {}", result.total_tokens_used);
    }

    if config.verbose {
        for record in &result.history {
            println!("\n--- Iteration {} ---", record.iteration_number);
            println!("Generator:\n{}", record.generator_output);
            match &record.critic_feedback {
                Some(feedback) => println!("\nCritic:\n{}", feedback),
                None => println!("\nCritic: (final iteration, not reviewed)"),
            }
        }
    }

    println!("\nFinal Refined Response:\n{}\n", result.final_response);
    Ok(())
}

fn choose_query() -> io::Result<Option<String>> {
    println!("Choose a query or enter your own:");
    for (i, query) in EXAMPLE_QUERIES.iter().enumerate() {
        println!("  {}. {}", i + 1, query);
    }
    println!("  {}. Enter custom query", EXAMPLE_QUERIES.len() + 1);

    let choice = prompt(&format!("\nYour choice (1-{}): ", EXAMPLE_QUERIES.len() + 1))?;
    let choice: usize = match choice.parse() {
        Ok(n) => n,
        Err(_) => {
            println!("Invalid input!");
            return Ok(None);
        }
    };

    if (1..=EXAMPLE_QUERIES.len()).contains(&choice) {
        Ok(Some(EXAMPLE_QUERIES[choice - 1].to_string()))
    } else if choice == EXAMPLE_QUERIES.len() + 1 {
        let query = prompt("Enter your query: ")?;
        if query.is_empty() {
            println!("Input is empty.");
            return Ok(None);
        }
        Ok(Some(query))
    } else {
        println!("Invalid choice!");
        Ok(None)
    }
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
