//! Simple Chat Example
//!
//! Asks a few questions, each traced as a `chat_completion` span with an
//! `llm_call` generation. Uses the OpenAI and ingestion credentials from the
//! environment, or runs offline when `LANTERN_OFFLINE` is set.

use lantern::prelude::*;
use lantern::{init_logging, LanternConfigBuilder, LogConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&LogConfig::default())?;
    lantern::config::load_dotenv();

    let offline = std::env::var_os("LANTERN_OFFLINE").is_some();
    let config = LanternConfigBuilder::from_lookup(|name| std::env::var(name).ok())?
        .offline(offline)
        .build()?;
    let session = Session::from_config(&config)?;
    let ctx = session.context();

    println!("Simple Chat Example");
    println!("===================");
    for question in &chat::SAMPLE_QUESTIONS[..3] {
        let reply = chat::chat_with_llm(&ctx, None, question).await?;
        println!("\nQ: {question}\nA: {}", reply.text);
    }

    let report = session.shutdown().await;
    println!("\nExported {} spans", report.exported);
    Ok(())
}
