//! `Cli`/`Command`, modeled on `sa-gateway::cli::{Cli, Command}`: a
//! `clap`-derived parser with a default subcommand (`Chat`, the way the
//! teacher defaults to `Serve`) plus `Run` for one-shot scripting,
//! `Doctor` for a config sanity check, and `Version`.

use std::io::Write;

use clap::{Parser, Subcommand};
use loom_domain::turn::TurnInput;

use crate::{bootstrap, config};

#[derive(Debug, Parser)]
#[command(name = "loom", version, about = "Conversational agent turn-pipeline runtime (reference CLI)")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read messages from stdin, one per line, and drive `ProcessTurn`
    /// for each against a persistent demo session (default when no
    /// subcommand is given).
    Chat,
    /// Send a single message and print the response.
    Run {
        /// The message to send.
        message: String,
        /// Emit the full `AlignmentResult` as JSON instead of just the response text.
        #[arg(long)]
        json: bool,
    },
    /// Validate the resolved configuration and print a summary.
    Doctor,
    /// Print version information.
    Version,
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        None | Some(Command::Chat) => run_chat().await,
        Some(Command::Run { message, json }) => run_once(&message, json).await,
        Some(Command::Doctor) => run_doctor(),
        Some(Command::Version) => {
            println!("loom {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_once(message: &str, json: bool) -> anyhow::Result<()> {
    let (pipeline_config, _path) = config::load_config()?;
    let runtime = bootstrap::build(pipeline_config).await;

    let input = TurnInput {
        tenant_id: runtime.tenant_id,
        agent_id: runtime.agent_id,
        channel: "cli".into(),
        channel_user_id: "local".into(),
        message: message.to_string(),
        session_id: None,
        metadata: None,
        idempotency_key: None,
    };

    let result = runtime.pipeline.process_turn(input).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.response);
    }
    Ok(())
}

async fn run_chat() -> anyhow::Result<()> {
    let (pipeline_config, _path) = config::load_config()?;
    let runtime = bootstrap::build(pipeline_config).await;

    eprintln!("loom chat — type a message and press enter (Ctrl-D to exit)");
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        eprint!("> ");
        std::io::stderr().flush().ok();
        line.clear();
        let read = stdin.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        let message = line.trim_end();
        if message.is_empty() {
            continue;
        }

        let input = TurnInput {
            tenant_id: runtime.tenant_id,
            agent_id: runtime.agent_id,
            channel: "cli".into(),
            channel_user_id: "local".into(),
            message: message.to_string(),
            session_id: None,
            metadata: None,
            idempotency_key: None,
        };

        match runtime.pipeline.process_turn(input).await {
            Ok(result) => println!("{}", result.response),
            Err(e) => eprintln!("turn failed: {e}"),
        }
    }
    Ok(())
}

fn run_doctor() -> anyhow::Result<()> {
    let (pipeline_config, path) = config::load_config()?;
    println!("config path: {path}");

    let retrieval = &pipeline_config.retrieval;
    let weight_sum = retrieval.w_vec + retrieval.w_bm25;
    if (weight_sum - 1.0).abs() > 0.01 {
        println!("warning: retrieval.w_vec + retrieval.w_bm25 = {weight_sum:.2}, expected close to 1.0");
    } else {
        println!("retrieval weights OK (w_vec={:.2}, w_bm25={:.2})", retrieval.w_vec, retrieval.w_bm25);
    }

    println!("enforcement.max_retries = {}", pipeline_config.enforcement.max_retries);
    println!("concurrency.turn_deadline_ms = {}", pipeline_config.concurrency.turn_deadline_ms);

    let flags = &pipeline_config.phases;
    println!(
        "phases enabled: situational_sensor={} interlocutor_update={} retrieval={} filtering={} gap_fill_planning={} tool_execution={} after_tool_bindings={} memory_ingestion={}",
        flags.situational_sensor,
        flags.interlocutor_update,
        flags.retrieval,
        flags.filtering,
        flags.gap_fill_planning,
        flags.tool_execution,
        flags.after_tool_bindings,
        flags.memory_ingestion,
    );

    println!("config OK");
    Ok(())
}
