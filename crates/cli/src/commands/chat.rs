//! `kindred chat` — Single-message or interactive conversation.
//!
//! Each turn injects the user's stored context into the system prompt, calls
//! the dispatch router, and records both messages. Every
//! `update_every_n_messages`-th stored message triggers a memory update, and
//! a successful update replaces the system prompt for the following turns.

use kindred_core::context::UserContext;
use kindred_core::message::Message;
use kindred_memory::{MemoryPipeline, format_context_for_prompt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use super::runtime::Runtime;

const PERSONA: &str = "You are Kindred, a warm and attentive companion. \
Speak naturally, remember what matters to the user, and never recite their \
profile back to them verbatim.";

const MESSAGE_COUNT_TRIGGER: &str = "message_count";

fn system_prompt(context_block: &str) -> String {
    format!("{PERSONA}\n\nWhat you know about the user:\n{context_block}")
}

fn context_message(context: &UserContext) -> Message {
    Message::system(system_prompt(&format_context_for_prompt(Some(context))))
}

/// Swap the leading system message for one built from `context`.
fn refresh_system_prompt(history: &mut [Message], context: &UserContext) {
    if let Some(first) = history.first_mut() {
        *first = context_message(context);
    }
}

struct Session<'a> {
    runtime: &'a Runtime,
    pipeline: MemoryPipeline,
    user: &'a str,
    model: Option<String>,
    history: Vec<Message>,
}

impl<'a> Session<'a> {
    async fn start(
        runtime: &'a Runtime,
        user: &'a str,
        model: Option<String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let pipeline = runtime.pipeline();
        let context = pipeline.accessor().load(user).await?;
        let history = vec![context_message(&context)];
        Ok(Self {
            runtime,
            pipeline,
            user,
            model,
            history,
        })
    }

    async fn turn(&mut self, text: &str) -> Result<String, Box<dyn std::error::Error>> {
        let user_message = Message::user(text);
        self.history.push(user_message.clone());

        let reply = self
            .runtime
            .router
            .converse(self.history.clone(), self.model.as_deref())
            .await;
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                self.history.pop();
                return Err(e.into());
            }
        };

        let assistant_message = Message::assistant(reply.clone());
        self.history.push(assistant_message.clone());

        self.record(&user_message).await;
        self.record(&assistant_message).await;
        Ok(reply)
    }

    /// Store a message and run the memory update when the count says so.
    /// Failures here never interrupt the conversation.
    async fn record(&mut self, message: &Message) {
        let count = match self.runtime.stores.record(self.user, message).await {
            Ok(count) => count,
            Err(e) => {
                warn!(user_id = self.user, error = %e, "Failed to store message");
                return;
            }
        };

        let every_n = self.runtime.config.memory.update_every_n_messages as u64;
        if MemoryPipeline::should_trigger(count, every_n) {
            match self
                .pipeline
                .run_memory_update(self.user, MESSAGE_COUNT_TRIGGER)
                .await
            {
                Ok(context) => refresh_system_prompt(&mut self.history, &context),
                Err(e) => {
                    warn!(user_id = self.user, error = %e, "Automatic memory update failed")
                }
            }
        }
    }
}

pub async fn run(
    user: &str,
    message: Option<String>,
    model: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::load().await?;

    if runtime.router.vendors().is_empty() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        for (_, var) in kindred_config::PROVIDER_KEY_VARS {
            eprintln!("    {var}");
        }
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!(
            "    {}",
            kindred_config::AppConfig::config_dir()
                .join("config.toml")
                .display()
        );
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let mut session = Session::start(&runtime, user, model).await?;

    if let Some(msg) = message {
        eprint!("  Thinking...");
        let reply = session.turn(&msg).await;
        eprint!("\r              \r");
        println!("{}", reply?);
        return Ok(());
    }

    println!();
    println!("  Kindred — Interactive Mode");
    println!();
    println!(
        "  Model:  {}",
        session.model.as_deref().unwrap_or(runtime.router.chat_model())
    );
    println!("  User:   {user}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        eprint!("  ...");
        match session.turn(line).await {
            Ok(reply) => {
                eprint!("\r     \r");
                println!();
                for reply_line in reply.lines() {
                    println!("  Kindred > {reply_line}");
                }
                println!();
            }
            Err(e) => {
                eprint!("\r     \r");
                eprintln!("  [Error] {e}");
                println!();
            }
        }
    }

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}
