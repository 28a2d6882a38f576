use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use lantern::config::{load_dotenv, LanternConfigBuilder};
use lantern::report;
use lantern::workflows::{Demo, DemoSuite};
use lantern::{init_logging, LogConfig, LogFormat, Session};

#[derive(Debug, Parser)]
#[command(name = "lantern", version, about = "Run traced LLM workflows and inspect their traces")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one demo, or all of them in sequence.
    Run {
        #[arg(value_enum, default_value_t = DemoArg::All)]
        demo: DemoArg,
        /// Use the scripted provider and a local trace bundle. Needs no credentials.
        #[arg(long)]
        offline: bool,
        /// Write traces to `<DIR>/traces/<bundle_id>/` instead of the ingestion API.
        #[arg(long, value_name = "DIR")]
        bundle_dir: Option<PathBuf>,
        /// Pause between demos.
        #[arg(long, value_name = "MS", default_value_t = 5000)]
        pause_ms: u64,
        #[arg(long, value_enum, default_value_t = FormatArg::Pretty)]
        log_format: FormatArg,
    },
    /// Print the trace tree of a bundle, or write it as HTML.
    Report {
        /// Bundle directory (`traces/<bundle_id>`).
        dir: PathBuf,
        #[arg(long, value_name = "OUT")]
        html: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DemoArg {
    All,
    Chat,
    Rag,
    Chains,
}

impl DemoArg {
    fn demos(self) -> Vec<Demo> {
        match self {
            DemoArg::All => Demo::ALL.to_vec(),
            DemoArg::Chat => vec![Demo::SimpleChat],
            DemoArg::Rag => vec![Demo::Rag],
            DemoArg::Chains => vec![Demo::Chains],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Pretty,
    Json,
}

impl From<FormatArg> for LogFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Pretty => LogFormat::Pretty,
            FormatArg::Json => LogFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            demo,
            offline,
            bundle_dir,
            pause_ms,
            log_format,
        } => {
            if let Err(e) = init_logging(&LogConfig::default().with_format(log_format.into())) {
                eprintln!("error: {e}");
                return ExitCode::from(2);
            }
            run(demo, offline, bundle_dir, Duration::from_millis(pause_ms)).await
        }
        Command::Report { dir, html } => report_cmd(dir, html),
    }
}

async fn run(demo: DemoArg, offline: bool, bundle_dir: Option<PathBuf>, pause: Duration) -> ExitCode {
    load_dotenv();
    let builder = match LanternConfigBuilder::from_lookup(|name| std::env::var(name).ok()) {
        Ok(builder) => builder.offline(offline),
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    let builder = match bundle_dir {
        Some(dir) => builder.bundle_dir(dir),
        None => builder,
    };
    let config = match builder.build() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("set them in the environment or a .env file, or pass --offline");
            return ExitCode::from(2);
        }
    };

    let session = match Session::from_config(&config) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };
    let bundle_dir = session.bundle().map(|b| b.dir().to_path_buf());

    let suite = DemoSuite::new(demo.demos()).with_pause(pause);
    let summary = suite.run_all(&session.context()).await;
    let flushed = session.shutdown().await;

    println!();
    println!("Successful: {}/{}", summary.successful, summary.total);
    println!("Failed:     {}/{}", summary.failed(), summary.total);
    for (demo, err) in &summary.failures {
        println!("  {}: {err}", demo.description());
    }
    if !flushed.is_complete() {
        println!(
            "Trace export incomplete: {} dropped, {} pending",
            flushed.dropped, flushed.pending
        );
    }
    match bundle_dir {
        Some(dir) => println!("Traces: {} (view with `lantern report {}`)", dir.display(), dir.display()),
        None => println!("Traces: {}", config.endpoint_url),
    }

    if summary.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn report_cmd(dir: PathBuf, html: Option<PathBuf>) -> ExitCode {
    let result = match &html {
        Some(out) => report::generate_report_html(&dir, out).map(|()| out.display().to_string()),
        None => report::load_report(&dir).map(|r| report::render_text(&r)),
    };
    match result {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
