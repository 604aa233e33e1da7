use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use surveyor::cache::ToolCache;
use surveyor::config::Settings;
use surveyor::conversation::{DialogueManager, DialogueState};
use surveyor::core::ResearchRequest;
use surveyor::embedding::HashEmbedder;
use surveyor::llm::{GeminiClient, LlmClient};
use surveyor::memory::MemoryManager;
use surveyor::pipeline::{ProgressEvent, ResearchPipeline};
use surveyor::store::{KvStore, MemoryKv};
use surveyor::tools::{builtin_registry, HfTrending, QueryRefiner, UnifiedSearch, UrlCollector};
use surveyor::ui::StatusUI;

#[derive(Parser)]
#[command(name = "surveyor")]
#[command(about = "LLM empowered literature survey assistant")]
#[command(
    long_about = "An automated research assistant that collects papers from multiple scholarly sources, screens them, extracts structured evidence, and writes a citation-grounded synthesis report.\n\nThe chat mode drives a conversation: your query is clarified when ambiguous, a plan is shown for approval, and the pipeline streams progress while it runs."
)]
#[command(after_help = "Examples:
  surveyor chat
  surveyor run \"vision transformers for medical imaging\"
  surveyor run --quick \"BERT paper\"")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(
        about = "Interactive research conversation",
        long_about = "Start a REPL-style conversation with the assistant.\n\nThe assistant clarifies ambiguous queries, presents an editable plan for approval, and executes it on confirmation. Say 'ok' to approve, 'cancel' to abort, or 'add <query>' / 'remove <query>' to edit the plan.",
        after_help = "Example:
  surveyor chat"
    )]
    Chat {
        /// User id for memory tracking
        #[arg(long, default_value = "default")]
        user: String,
    },

    #[command(
        about = "Run a one-shot research pipeline",
        long_about = "Plan and execute a research run for a topic without the conversation layer. The report (FULL mode) is written to a Markdown file in the current directory.",
        after_help = "Examples:
  surveyor run \"graph neural networks for drug discovery\"
  surveyor run --quick \"BERT paper\""
    )]
    Run {
        /// Research topic
        topic: String,
        /// Force quick mode (no synthesis, no report)
        #[arg(long)]
        quick: bool,
        /// Output file for the report
        #[arg(short, long)]
        output: Option<String>,
    },

    #[command(about = "Show configuration status")]
    Status,
}

fn build_pipeline(
    settings: &Settings,
    llm: Option<Arc<dyn LlmClient>>,
    kv: Arc<dyn KvStore>,
) -> Arc<ResearchPipeline> {
    let refiner = QueryRefiner::new(llm.clone());
    let search = Arc::new(UnifiedSearch::new(
        settings.tool_timeout,
        refiner,
        settings.max_refine_attempts,
    ));
    let collector = Arc::new(UrlCollector::new(settings.tool_timeout));
    let hf = Arc::new(HfTrending::new(settings.tool_timeout));
    let registry = Arc::new(builtin_registry(search, collector, hf));
    let cache = Arc::new(ToolCache::new(Arc::clone(&kv)));

    Arc::new(ResearchPipeline::new(
        llm,
        registry,
        cache,
        kv,
        Arc::new(HashEmbedder::default()),
        settings.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    let llm: Option<Arc<dyn LlmClient>> = match GeminiClient::from_env(&settings) {
        Ok(client) => Some(Arc::new(client)),
        Err(_) => {
            StatusUI::info("GEMINI_API_KEY not set; running with rule-based fallbacks");
            None
        }
    };
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());

    match cli.command {
        Commands::Chat { user } => chat(&settings, llm, kv, &user).await?,
        Commands::Run {
            topic,
            quick,
            output,
        } => run_once(&settings, llm, kv, &topic, quick, output).await?,
        Commands::Status => {
            StatusUI::info(&format!(
                "LLM: {}",
                if settings.gemini_api_key.is_some() {
                    settings.gemini_model.as_str()
                } else {
                    "not configured"
                }
            ));
            StatusUI::info(&format!(
                "PDF threshold: {:.1}  screening batch: {}  pdf gate: {}  token gate: {}",
                settings.pdf_relevance_threshold,
                settings.screening_batch_size,
                settings.pdf_gate_threshold,
                settings.token_gate_threshold
            ));
        }
    }

    Ok(())
}

async fn chat(
    settings: &Settings,
    llm: Option<Arc<dyn LlmClient>>,
    kv: Arc<dyn KvStore>,
    user: &str,
) -> Result<()> {
    let pipeline = build_pipeline(settings, llm.clone(), Arc::clone(&kv));
    let memory = Arc::new(MemoryManager::new(Arc::clone(&kv)));
    let mut manager = DialogueManager::new(llm, pipeline, memory, kv);
    manager.set_progress_hook(Arc::new(|event: ProgressEvent| {
        StatusUI::info(&format!("[{}] {}", event.phase, event.message));
    }));

    let conversation_id = manager.start_conversation(user).await;
    StatusUI::info("Research assistant ready. Type a topic, or 'exit' to quit.");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        let response = manager.process_message(&conversation_id, line).await;
        StatusUI::assistant(&response.message);
        if response.state == DialogueState::Complete {
            if let Some(result) = &response.result {
                if !result.report_markdown.is_empty() {
                    let path = format!("report_{}.md", result.session_id);
                    std::fs::write(&path, &result.report_markdown)?;
                    StatusUI::success(&format!("Report written to {path}"));
                }
            }
        }
    }

    Ok(())
}

async fn run_once(
    settings: &Settings,
    llm: Option<Arc<dyn LlmClient>>,
    kv: Arc<dyn KvStore>,
    topic: &str,
    quick: bool,
    output: Option<String>,
) -> Result<()> {
    let pipeline = build_pipeline(settings, llm, kv);

    let topic = if quick {
        format!("quick {topic}")
    } else {
        topic.to_string()
    };
    let mut request = ResearchRequest::new(topic);

    let pb = StatusUI::spinner("Generating research plan...");
    let plan = pipeline.generate_adaptive_plan(&mut request).await;
    StatusUI::finish_spinner(pb, &format!("Plan: {} steps", plan.plan.steps.len()));
    println!("{}\n", plan.to_display());

    let progress: surveyor::pipeline::ProgressHook = Arc::new(|event: ProgressEvent| {
        StatusUI::info(&format!("[{}] {}", event.phase, event.message));
    });
    let result = pipeline
        .execute_plan(
            &request,
            plan,
            Some(progress),
            None,
            CancellationToken::new(),
            None,
        )
        .await?;

    println!("\n{}", result.to_display());
    if !result.report_markdown.is_empty() {
        let path = output.unwrap_or_else(|| format!("report_{}.md", result.session_id));
        std::fs::write(&path, &result.report_markdown)?;
        StatusUI::success(&format!("Report written to {path}"));
    }

    Ok(())
}
