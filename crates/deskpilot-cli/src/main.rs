use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use deskpilot_agent::{ChatEngine, ChatInput};
use deskpilot_capture::{CommandCapture, ScreenshotProvider};
use deskpilot_core::{EngineConfig, Message, Role};
use deskpilot_llm::ReplaySource;
use deskpilot_store::ConversationStore;

#[derive(Parser)]
#[command(name = "deskpilot")]
#[command(about = "Local agent-orchestration engine", long_about = None)]
struct Cli {
    /// Workspace directory holding settings, logs, and snapshots.
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one prompt through the engine, with a chunk recording standing
    /// in for the model/execution stream.
    Run(RunArgs),
    /// List saved conversation snapshots.
    History,
    /// Print a saved conversation snapshot.
    Show { name: String },
}

#[derive(Args)]
struct RunArgs {
    prompt: String,

    /// JSONL chunk recording (one chunk object per line).
    #[arg(long)]
    chunks: PathBuf,

    /// Emit stream events as JSON lines instead of the final messages.
    #[arg(long)]
    stream: bool,

    /// Keep re-prompting with the loop message until a termination phrase
    /// appears in the reply.
    #[arg(long)]
    task_loop: bool,

    /// Cap on task-loop iterations.
    #[arg(long, default_value_t = 10)]
    max_loops: u32,

    /// Attach a screenshot of the current screen to the outgoing message.
    #[arg(long)]
    with_screen: bool,
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run(&cli.workspace, args),
        Commands::History => history(&cli.workspace),
        Commands::Show { name } => show(&cli.workspace, &name),
    };
    if let Err(err) = result {
        eprintln!("deskpilot: {err:#}");
        std::process::exit(1);
    }
}

fn run(workspace: &Path, args: RunArgs) -> Result<()> {
    let cfg = EngineConfig::ensure(workspace)?;
    let engine = ChatEngine::with_config(
        workspace,
        cfg.clone(),
        Arc::new(ReplaySource::new(&args.chunks)),
    )?;

    let screenshot = if args.with_screen {
        let capture = CommandCapture::new(
            cfg.capture.resolved_dir(workspace),
            cfg.capture.command.clone(),
        );
        Some(capture.capture()?)
    } else {
        None
    };
    let input = build_input(&args.prompt, screenshot);

    if args.stream {
        for event in engine.chat_stream(Some(input))? {
            println!("{}", serde_json::to_string(&event?)?);
        }
        return Ok(());
    }

    let mut appended = engine.chat(Some(input))?;
    print_messages(&appended);

    if args.task_loop {
        for _ in 0..args.max_loops {
            if reply_breaks_loop(&engine, &appended) {
                return Ok(());
            }
            appended = engine.chat(Some(cfg.task_loop.message.as_str().into()))?;
            print_messages(&appended);
        }
        bail!("task loop hit the {} iteration cap", args.max_loops);
    }
    Ok(())
}

fn reply_breaks_loop(engine: &ChatEngine, appended: &[Message]) -> bool {
    appended
        .iter()
        .rev()
        .find(|m| m.role() == Role::Assistant && m.kind() == deskpilot_core::ChunkKind::Message)
        .is_some_and(|m| engine.loop_should_break(m.content()))
}

/// Outgoing message for a run: a bare prompt, or — with a screenshot — a
/// user text message plus a user image message, replacing the log wholesale.
fn build_input(prompt: &str, screenshot: Option<PathBuf>) -> ChatInput {
    match screenshot {
        None => prompt.into(),
        Some(path) => ChatInput::Transcript(vec![
            Message::Text {
                role: Role::User,
                content: prompt.to_string(),
            },
            Message::Image {
                role: Role::User,
                format: "path".to_string(),
                content: path.display().to_string(),
            },
        ]),
    }
}

fn history(workspace: &Path) -> Result<()> {
    let store = snapshot_store(workspace)?;
    for name in store.list()? {
        println!("{name}");
    }
    Ok(())
}

fn show(workspace: &Path, name: &str) -> Result<()> {
    let store = snapshot_store(workspace)?;
    print_messages(&store.load(name)?);
    Ok(())
}

fn snapshot_store(workspace: &Path) -> Result<ConversationStore> {
    let cfg = EngineConfig::ensure(workspace)?;
    Ok(ConversationStore::new(
        cfg.conversation.resolved_dir(workspace),
    ))
}

fn print_messages(messages: &[Message]) {
    for message in messages {
        let kind = message.kind().as_str();
        match message.format() {
            Some(format) => println!(
                "[{} {kind}/{format}] {}",
                message.role().as_str(),
                message.content()
            ),
            None => println!("[{} {kind}] {}", message.role().as_str(), message.content()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_prompt_becomes_text_input() {
        let input = build_input("do the thing", None);
        assert_eq!(input, ChatInput::Text("do the thing".to_string()));
    }

    #[test]
    fn screenshot_run_sends_text_plus_image() {
        let input = build_input("do the thing", Some(PathBuf::from("/tmp/shot.png")));
        let ChatInput::Transcript(messages) = input else {
            panic!("expected transcript input");
        };
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role(), Role::User);
        assert_eq!(messages[1].format(), Some("path"));
        assert_eq!(messages[1].content(), "/tmp/shot.png");
    }
}
