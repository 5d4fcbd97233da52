use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use browser_pilot::{
    AgentConfig, AgentLoop, ChatCompletionsClient, FieldValueStore, FillPolicy, RunOutcome,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "browser-pilot", about = "LLM-driven browser action loop")]
struct Cli {
    /// Main goal to work toward. Prompted for when omitted.
    #[arg(long)]
    goal: Option<String>,

    /// Initial URL to start browsing from. Prompted for when omitted.
    #[arg(long)]
    url: Option<String>,

    /// Run with a visible browser window.
    #[arg(long)]
    headed: bool,

    #[arg(long, default_value_t = 25)]
    max_steps: u32,

    /// Path of the persisted field-value snapshot. In-memory when omitted.
    #[arg(long)]
    store: Option<PathBuf>,

    /// Seed the field-value store, e.g. --remember "Username=me@example.com".
    #[arg(long = "remember", value_parser = parse_key_val)]
    remember: Vec<(String, String)>,

    /// Prefer stored field values over plan-supplied ones.
    #[arg(long)]
    prefer_stored: bool,

    #[arg(long, default_value = "https://api.openai.com/v1/chat/completions")]
    model_endpoint: String,

    #[arg(long, default_value = "gpt-4o")]
    model: String,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected FIELD=VALUE, got '{}'", raw))
}

fn prompt_line(prompt: &str) -> io::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let goal = match cli.goal {
        Some(goal) => goal,
        None => prompt_line("Enter your main goal: ")?,
    };
    let url = match cli.url {
        Some(url) => url,
        None => prompt_line("Enter the initial URL to start browsing: ")?,
    };

    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| "OPENAI_API_KEY is not set in the environment")?;

    let mut store = match &cli.store {
        Some(path) => FieldValueStore::open(path)?,
        None => FieldValueStore::ephemeral(),
    };
    for (field, value) in &cli.remember {
        store.set(field, value)?;
    }

    let mut config = AgentConfig::default();
    config.browser.headless = !cli.headed;
    config.loop_limits.max_steps = cli.max_steps;
    if cli.prefer_stored {
        config.executor.fill_policy = FillPolicy::PreferStored;
    }

    let model = ChatCompletionsClient::new(cli.model_endpoint, cli.model, api_key);
    let mut agent = AgentLoop::new(config, model, store).await?;
    info!(session_id = agent.session_id(), goal = %goal, "starting action loop");

    match agent.run(&goal, &url).await? {
        RunOutcome::Concluded { reply, steps } => {
            println!("Agent concluded after {} steps:\n{}", steps, reply);
        }
        RunOutcome::StepLimitReached { steps } => {
            println!("Step limit of {} reached without a conclusion.", steps);
        }
        RunOutcome::AbortedAfterFailures { failures } => {
            println!("Aborted after {} consecutive failures.", failures);
        }
    }

    Ok(())
}
