//! LmsComplete CLI entry point.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde_json::Value;

use lms_complete::host::ContextHandle;
use lms_complete::{
    handle_command, Command, CompletionConfig, CompletionOptions, CompletionOrchestrator,
    CompletionStatus,
};
use lms_complete_cli::{resolve_fixture_path, Fixture};

#[derive(Parser)]
#[command(
    name = "lms-complete",
    about = "Discover e-learning completion APIs (SCORM, xAPI, AICC) and report completion",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    /// Include the decision log in the output.
    #[arg(long, global = true)]
    decisions: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Target {
    /// JSON page-graph fixture.
    #[arg(long, conflicts_with = "url")]
    fixture: Option<PathBuf>,

    /// Live course URL (requires the `chromium` feature).
    #[arg(long)]
    url: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Passed,
    Completed,
    Failed,
}

impl From<StatusArg> for CompletionStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Passed => CompletionStatus::Passed,
            StatusArg::Completed => CompletionStatus::Completed,
            StatusArg::Failed => CompletionStatus::Failed,
        }
    }
}

#[derive(Args, Clone)]
struct OptionArgs {
    #[arg(long, value_enum, default_value = "passed")]
    status: StatusArg,

    #[arg(long, default_value_t = 100.0)]
    score: f64,

    #[arg(long, default_value_t = 0.0)]
    min_score: f64,

    #[arg(long, default_value_t = 100.0)]
    max_score: f64,

    /// Session time in seconds.
    #[arg(long, default_value_t = 300)]
    session_time: u64,

    /// Drive the Nth discovered API instead of the highest ranked.
    #[arg(long)]
    api_index: Option<usize>,

    /// End the session after reporting.
    #[arg(long)]
    terminate: bool,

    /// Also record a synthetic interaction.
    #[arg(long)]
    interaction: bool,
}

impl From<OptionArgs> for CompletionOptions {
    fn from(args: OptionArgs) -> Self {
        CompletionOptions {
            status: args.status.into(),
            score: args.score,
            min_score: args.min_score,
            max_score: args.max_score,
            session_time_seconds: args.session_time,
            api_index: args.api_index,
            terminate: args.terminate,
            include_interaction: args.interaction,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the completion APIs reachable from the page.
    Discover {
        #[command(flatten)]
        target: Target,
    },

    /// Report completion through the best API, falling back to a sweep.
    Complete {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        options: OptionArgs,
    },

    /// Report completion through every discovered API.
    KitchenSink {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        options: OptionArgs,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   lms-complete completions bash > ~/.local/share/bash-completion/completions/lms-complete
    ///   lms-complete completions zsh > ~/.zfunc/_lms-complete
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

/// Whatever must outlive the orchestrator for its context to stay valid.
enum Page {
    Fixture(Fixture),
    #[cfg(feature = "chromium")]
    Live(lms_complete_cli::chromium::ChromiumSession),
}

impl Page {
    async fn open(target: &Target, config: &CompletionConfig) -> anyhow::Result<Self> {
        if let Some(url) = &target.url {
            return open_live(url, config).await;
        }
        let path = resolve_fixture_path(target.fixture.as_deref())
            .context("no page given; pass --fixture <path> or --url <course>")?;
        Ok(Page::Fixture(Fixture::load(&path)?))
    }

    async fn context(&self) -> anyhow::Result<ContextHandle> {
        match self {
            Page::Fixture(fixture) => Ok(fixture.origin()),
            #[cfg(feature = "chromium")]
            Page::Live(session) => session.context().await,
        }
    }
}

#[cfg(feature = "chromium")]
async fn open_live(url: &str, config: &CompletionConfig) -> anyhow::Result<Page> {
    let session =
        lms_complete_cli::chromium::ChromiumSession::launch(url, config.step_timeout()).await?;
    Ok(Page::Live(session))
}

#[cfg(not(feature = "chromium"))]
async fn open_live(_url: &str, _config: &CompletionConfig) -> anyhow::Result<Page> {
    anyhow::bail!("--url requires lms-complete to be built with the `chromium` feature")
}

fn init_logging(cli: &Cli) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let (target, command) = match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(
                *shell,
                &mut Cli::command(),
                "lms-complete",
                &mut std::io::stdout(),
            );
            return Ok(());
        }
        Commands::Discover { target } => (target, Command::RequestDiscovery),
        Commands::Complete { target, options } => (
            target,
            Command::RequestCompletion {
                options: options.clone().into(),
            },
        ),
        Commands::KitchenSink { target, options } => (
            target,
            Command::RequestKitchenSink {
                options: options.clone().into(),
            },
        ),
    };

    let config = CompletionConfig::from_env()?;
    let page = Page::open(target, &config).await?;
    let mut orchestrator = CompletionOrchestrator::new(page.context().await?, config);

    let result = handle_command(&mut orchestrator, command).await?;
    let failed = result.get("success").and_then(Value::as_bool) == Some(false);

    let output = if cli.decisions {
        serde_json::json!({
            "result": result,
            "decisions": orchestrator.decisions().export(),
        })
    } else {
        result
    };

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &output)?;
    writeln!(stdout)?;
    drop(stdout);
    drop(page);

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
