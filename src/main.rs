//! topical-form - run a form schema on the terminal
//!
//! Reads a schema (`{ field: { "type": "string", "prompt": "..." } }`) from
//! the file given as the only argument, asks each field on stdout and reads
//! answers from stdin. State lives in SQLite, so an interrupted session picks
//! up where it left off.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use topical::{
    Activity, ActivitySink, Database, DatabaseStore, EngineConfig, RuntimeManager, Schema,
    SimpleForm, SimpleFormInitArgs, SimpleFormReturn, TopicRegistry,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const FORM_TOPIC: &str = "form";

/// Writes outbound messages to stdout
struct ConsoleSink;

#[async_trait]
impl ActivitySink for ConsoleSink {
    async fn send_activity(&self, _conv_id: &str, text: &str) -> Result<(), String> {
        println!("{text}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout stays the conversation
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "topical=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let Some(schema_path) = std::env::args().nth(1).map(PathBuf::from) else {
        eprintln!("usage: topical-form <schema.json>");
        std::process::exit(2);
    };

    let config = EngineConfig::from_env();

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    let registry = TopicRegistry::new().with_topic(SimpleForm::with_max_turns(
        FORM_TOPIC,
        config.prompt_max_turns,
    ))?;
    let conv_id = config.conversation_id.clone();
    let manager = RuntimeManager::new(
        registry,
        Arc::new(DatabaseStore::new(db)),
        Arc::new(ConsoleSink),
        config,
    );

    let schema: Schema = serde_json::from_str(&std::fs::read_to_string(&schema_path)?)?;

    if let Some(snapshot) = manager.snapshot(&conv_id).await? {
        tracing::info!(
            conv_id = %conv_id,
            instances = snapshot.instances.len(),
            "Resuming conversation"
        );
        // Repeat the question that is still waiting for an answer
        if let Some(prompt) = snapshot
            .active_leaf()
            .and_then(|leaf| leaf.state["prompt_state"]["prompt"].as_str())
        {
            println!("{prompt}");
        }
    } else {
        tracing::info!(conv_id = %conv_id, fields = schema.len(), "Starting form");
        let args = serde_json::to_value(SimpleFormInitArgs {
            schema: schema.clone(),
        })?;
        let outcome = manager.start(&conv_id, FORM_TOPIC, args).await?;
        if let Some(result) = outcome.completed_as::<SimpleFormReturn>()? {
            print_form(&schema, &result)?;
            return Ok(());
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let outcome = manager.deliver(&conv_id, Activity::message(line)).await?;
        if let Some(result) = outcome.completed_as::<SimpleFormReturn>()? {
            print_form(&schema, &result)?;
            return Ok(());
        }
    }

    tracing::info!(conv_id = %conv_id, "Input closed, conversation left open");
    Ok(())
}

/// Print the answers in the order the schema asked them
fn print_form(schema: &Schema, result: &SimpleFormReturn) -> serde_json::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&schema.ordered(&result.form))?
    );
    Ok(())
}
