use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use textfoundry::config::Config;
use textfoundry::coordinator::{Coordinator, Outcome, PasteSink, PromptChoice, TextSource, Trigger};
use textfoundry::dispatch::ProviderKind;
use textfoundry::dispatch::http::HttpTransport;
use textfoundry::error::FoundryError;
use textfoundry::history::{HistoryStore, TimeRange, UsageStats, now_ms};
use textfoundry::orchestrator::Orchestrator;
use textfoundry::prompts::{CustomPromptHistory, PromptLibrary};

const USAGE: &str = "\
usage: textfoundry [--prompt <name> | --custom <text>]   correct text read from stdin
       textfoundry models [provider]                     list models
       textfoundry prompts                               list saved prompts
       textfoundry stats [hour|day|week|month|all]       usage statistics";

enum Command {
    Correct(PromptArg),
    Models(Option<String>),
    Prompts,
    Stats(TimeRange),
}

enum PromptArg {
    Selected,
    Named(String),
    Custom(String),
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Command, String> {
    let Some(first) = args.next() else {
        return Ok(Command::Correct(PromptArg::Selected));
    };
    let command = match first.as_str() {
        "models" => Command::Models(args.next()),
        "prompts" => Command::Prompts,
        "stats" => {
            let range = match args.next().as_deref() {
                None | Some("all") => TimeRange::All,
                Some("hour") => TimeRange::Hour,
                Some("day") => TimeRange::Day,
                Some("week") => TimeRange::Week,
                Some("month") => TimeRange::Month,
                Some(other) => return Err(format!("unknown range: {other}")),
            };
            Command::Stats(range)
        }
        "--prompt" => Command::Correct(PromptArg::Named(
            args.next().ok_or("--prompt needs a name")?,
        )),
        "--custom" => Command::Correct(PromptArg::Custom(
            args.next().ok_or("--custom needs prompt text")?,
        )),
        other => return Err(format!("unknown argument: {other}")),
    };
    if let Some(extra) = args.next() {
        return Err(format!("unexpected argument: {extra}"));
    }
    Ok(command)
}

/// Reads the whole of stdin as the selection.
struct StdinSource;

#[async_trait]
impl TextSource for StdinSource {
    async fn capture(&self) -> Option<String> {
        let mut text = String::new();
        match tokio::io::stdin().read_to_string(&mut text).await {
            Ok(_) => Some(text),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stdin");
                None
            }
        }
    }
}

struct StdoutSink;

#[async_trait]
impl PasteSink for StdoutSink {
    async fn deliver(&self, text: &str) -> Result<(), FoundryError> {
        let mut out = tokio::io::stdout();
        out.write_all(text.as_bytes())
            .await
            .and(out.flush().await)
            .map_err(|e| FoundryError::Config(format!("stdout: {e}")))
    }
}

fn load_env() {
    // Prefer a .env next to the binary, then the project root for dev builds,
    // then dotenvy's CWD search.
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        for candidate in [dir.join(".env"), dir.join("../../.env")] {
            if candidate.exists() {
                dotenvy::from_path(&candidate).ok();
                return;
            }
        }
    }
    dotenvy::dotenv().ok();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    load_env();

    let command = match parse_args(std::env::args().skip(1)) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}\n{USAGE}");
            std::process::exit(2);
        }
    };

    let config = Config::load()?;
    let history = Arc::new(HistoryStore::open(config.history_path()).await);
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(HttpTransport::new())));

    match command {
        Command::Stats(range) => {
            let stats = UsageStats::compute(&history.items().await, range, now_ms());
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Models(provider) => {
            let provider = match provider {
                Some(name) => name.parse::<ProviderKind>(),
                None => config.settings.provider(),
            };
            let result = match provider {
                Ok(p) => {
                    orchestrator
                        .list_models(p, config.settings.credential_for(p))
                        .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(models) => models.iter().for_each(|m| println!("{m}")),
                Err(e) => fail(&e),
            }
        }
        Command::Prompts => {
            let library = PromptLibrary::open(config.prompts_path(), config.prompts.clone()).await;
            for prompt in library.prompts().await {
                println!("{}\t{}", prompt.id, prompt.name);
            }
        }
        Command::Correct(arg) => {
            let library =
                Arc::new(PromptLibrary::open(config.prompts_path(), config.prompts.clone()).await);
            let choice = match arg {
                PromptArg::Selected => PromptChoice::Selected,
                PromptArg::Custom(text) => PromptChoice::Custom(text),
                PromptArg::Named(name) => match library.find_by_name(&name).await {
                    Some(p) => PromptChoice::Saved(p.id),
                    None => fail(&FoundryError::PromptNotFound(name)),
                },
            };

            let custom = Arc::new(CustomPromptHistory::open(config.custom_prompts_path()).await);
            let coordinator = Coordinator::new(
                orchestrator,
                Arc::new(config),
                Arc::new(StdinSource),
                Arc::new(StdoutSink),
            )
            .with_prompts(library)
            .with_custom_prompts(custom)
            .with_history(history);

            match coordinator.trigger(Trigger::hotkey(choice)).await {
                Ok(Outcome::Completed(item)) => {
                    tracing::info!(
                        duration_s = item.duration,
                        tokens = item.token_count,
                        "done"
                    );
                }
                Ok(Outcome::Ignored) => {}
                Err(e) => fail(&e),
            }
        }
    }

    Ok(())
}

fn fail(e: &FoundryError) -> ! {
    tracing::error!(error = %e, "textfoundry failed");
    eprintln!("{}", e.user_message());
    std::process::exit(1);
}
