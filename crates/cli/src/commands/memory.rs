//! `kindred memory` — Run, inspect, and audit memory updates.

use kindred_memory::format_context_for_prompt;

use super::runtime::Runtime;

pub async fn update(user: &str, trigger: &str) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::load().await?;
    let pipeline = runtime.pipeline();

    println!("🧠 Updating memory for '{user}' (trigger: {trigger})...");
    let context = pipeline.run_memory_update(user, trigger).await?;
    println!("✅ Memory updated.");
    println!();
    println!("{}", serde_json::to_string_pretty(&context)?);
    Ok(())
}

pub async fn show(user: &str, prompt: bool) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::load().await?;
    let context = runtime.pipeline().accessor().load(user).await?;

    if prompt {
        println!("{}", format_context_for_prompt(Some(&context)));
    } else {
        println!("{}", serde_json::to_string_pretty(&context)?);
    }
    Ok(())
}

pub async fn logs(user: &str, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::load().await?;
    let entries = runtime.pipeline().accessor().recent_logs(user, limit).await?;

    if entries.is_empty() {
        println!("   No memory updates recorded for '{user}'.");
        return Ok(());
    }

    println!("📜 Recent memory updates for '{user}'");
    for entry in entries {
        println!(
            "  {}  {:<9}  {:<14} {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.status.as_str(),
            entry.trigger,
            entry.details.as_deref().unwrap_or("")
        );
    }
    Ok(())
}
