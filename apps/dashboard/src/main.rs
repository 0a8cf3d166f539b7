use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use client_core::{
    ClientEvent, DashboardClient, DashboardError, DashboardSession, HttpRecipeSubmitter,
    StompTelemetrySource,
};
use shared::{
    recipe::{validate, RecipeDraft, RecipeField},
    telemetry::MachineSnapshot,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod view;

use config::{load_settings, ConsoleSettings};

#[derive(Parser, Debug)]
#[command(name = "coffee-dashboard", about = "Operator console for the coffee blending machine")]
struct Cli {
    /// Settings file; `dashboard.toml` is read when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_origin: Option<String>,
    #[arg(long)]
    api_prefix: Option<String>,
    #[arg(long)]
    ws_url: Option<String>,
    /// Used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

/// Raw field text, sanitized the same way the form sanitizes keystrokes.
#[derive(Args, Debug, Default)]
struct RecipeArgs {
    #[arg(long, allow_hyphen_values = true)]
    total_weight: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    ra: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    rb: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    rc: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    rpm: Option<String>,
    #[arg(long, allow_hyphen_values = true)]
    blend_time: Option<String>,
}

impl RecipeArgs {
    fn to_draft(&self) -> RecipeDraft {
        let mut draft = RecipeDraft::default();
        let fields = [
            (RecipeField::TotalWeight, &self.total_weight),
            (RecipeField::RatioA, &self.ra),
            (RecipeField::RatioB, &self.rb),
            (RecipeField::RatioC, &self.rc),
            (RecipeField::BlenderRpm, &self.rpm),
            (RecipeField::BlendTime, &self.blend_time),
        ];
        for (field, raw) in fields {
            if let Some(raw) = raw {
                draft.set_field(field, raw);
            }
        }
        draft
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a recipe without contacting the controller.
    Check(RecipeArgs),
    /// Submit a recipe and optionally follow the run until it completes.
    Make {
        #[command(flatten)]
        recipe: RecipeArgs,
        #[arg(long)]
        follow: bool,
    },
    /// Print telemetry as it arrives.
    Watch,
    /// Line-driven console: `set <field> <value>`, `start`, `status`, `recipe`, `quit`.
    Interactive,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = resolve_settings(&cli)?;

    match cli.command {
        Command::Check(recipe) => check(&recipe.to_draft()),
        Command::Make { recipe, follow } => {
            let client = build_client(&settings, recipe.to_draft())?;
            make(client, follow).await
        }
        Command::Watch => {
            let client = build_client(&settings, RecipeDraft::default())?;
            watch(client).await
        }
        Command::Interactive => {
            let client = build_client(&settings, RecipeDraft::default())?;
            interactive(client).await
        }
    }
}

fn resolve_settings(cli: &Cli) -> Result<ConsoleSettings> {
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(v) = &cli.api_origin {
        settings.api_origin = v.clone();
    }
    if let Some(v) = &cli.api_prefix {
        settings.api_prefix = v.clone();
    }
    if let Some(v) = &cli.ws_url {
        settings.ws_url = v.clone();
    }
    settings.validate().context("invalid dashboard settings")?;
    Ok(settings)
}

fn build_client(settings: &ConsoleSettings, draft: RecipeDraft) -> Result<Arc<DashboardClient>> {
    let api_base = settings.api_base();
    let submitter = HttpRecipeSubmitter::new(&api_base, settings.request_timeout())?;
    let telemetry = StompTelemetrySource::new(&settings.ws_url, settings.reconnect_delay())?;
    info!(
        api_base = %api_base,
        ws_url = %settings.ws_url,
        topic = %settings.topic,
        "dashboard: configured"
    );
    Ok(DashboardClient::with_session(
        Arc::new(submitter),
        Arc::new(telemetry),
        settings.topic.clone(),
        DashboardSession::with_draft(draft),
    ))
}

fn check(draft: &RecipeDraft) -> Result<()> {
    println!("{}", view::render_recipe(draft, false));
    match validate(draft) {
        Ok(_) => {
            println!("recipe OK");
            Ok(())
        }
        Err(err) => bail!("recipe rejected: {err}"),
    }
}

async fn make(client: Arc<DashboardClient>, follow: bool) -> Result<()> {
    let mut events = client.subscribe_events();
    if follow {
        client.start().await?;
    }

    let mut printer = LogPrinter::default();
    let mut run = RunFollower::default();
    let outcome = client.submit().await;
    let mut finished = None;
    while let Ok(event) = events.try_recv() {
        if let Some(snapshot) = show(event, &mut printer, &mut run) {
            if run.is_done(&snapshot) {
                finished = Some(snapshot);
            }
        }
    }
    if let Err(err) = outcome {
        client.stop().await;
        bail!("production run not started: {err}");
    }
    if !follow {
        return Ok(());
    }
    if let Some(snapshot) = finished {
        println!("{}", view::render_machine(&snapshot, &client.draft().await));
        client.stop().await;
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    let Some(snapshot) = show(event, &mut printer, &mut run) else {
                        continue;
                    };
                    if run.is_done(&snapshot) {
                        println!("{}", view::render_machine(&snapshot, &client.draft().await));
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("dashboard: skipped {skipped} events");
                    run.lagged();
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    client.stop().await;
    Ok(())
}

async fn watch(client: Arc<DashboardClient>) -> Result<()> {
    let mut events = client.subscribe_events();
    client.start().await?;
    let mut printer = LogPrinter::default();
    let mut run = RunFollower::default();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    show(event, &mut printer, &mut run);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("dashboard: skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    client.stop().await;
    Ok(())
}

async fn interactive(client: Arc<DashboardClient>) -> Result<()> {
    let mut events = client.subscribe_events();
    client.start().await?;
    let mut printer = LogPrinter::default();
    let mut run = RunFollower::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", view::render_recipe(&client.draft().await, false));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if !run_command(&client, line.trim()).await {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    show(event, &mut printer, &mut run);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("dashboard: skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    client.stop().await;
    Ok(())
}

/// Returns false when the operator asked to leave.
async fn run_command(client: &Arc<DashboardClient>, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        None => {}
        Some("quit" | "exit") => return false,
        Some("set") => {
            let (Some(field), value) = (parts.next(), parts.next().unwrap_or("")) else {
                println!("usage: set <field> <value>");
                return true;
            };
            match field.parse::<RecipeField>() {
                Ok(field) => match client.edit_field(field, value).await {
                    Ok(value) => println!("{} = {value}", field.label()),
                    Err(err) => println!("{err}"),
                },
                Err(err) => println!("{err}"),
            }
        }
        Some("start") => {
            let client = Arc::clone(client);
            tokio::spawn(async move {
                match client.submit().await {
                    Ok(recipe) => info!(
                        total_weight = recipe.total_weight_grams(),
                        "dashboard: production run accepted"
                    ),
                    Err(err @ DashboardError::CommunicationFailure(_)) => warn!("dashboard: {err}"),
                    Err(err) => println!("{err}"),
                }
            });
        }
        Some("status") => {
            println!(
                "{}",
                view::render_machine(&client.snapshot().await, &client.draft().await)
            );
        }
        Some("recipe") => {
            println!(
                "{}",
                view::render_recipe(&client.draft().await, client.is_processing().await)
            );
        }
        Some(other) => {
            println!("unknown command '{other}' (set, start, status, recipe, quit)");
        }
    }
    true
}

/// Prints what an event means to the operator. Returns the snapshot it carried.
fn show(
    event: ClientEvent,
    printer: &mut LogPrinter,
    run: &mut RunFollower,
) -> Option<MachineSnapshot> {
    match event {
        ClientEvent::RunStarted => {
            printer.restart();
            run.run_started();
            None
        }
        ClientEvent::SnapshotUpdated(snapshot) => {
            printer.print_new(&snapshot);
            Some(snapshot)
        }
        ClientEvent::TelemetryConnected => {
            println!("[telemetry connected]");
            None
        }
        ClientEvent::TelemetryDisconnected(reason) => {
            println!("[telemetry disconnected: {reason}]");
            None
        }
        ClientEvent::DraftUpdated(_) | ClientEvent::Error(_) => None,
    }
}

/// Prints only log entries not yet shown. A run start prints the log from the top.
#[derive(Default)]
struct LogPrinter {
    printed: usize,
}

impl LogPrinter {
    fn restart(&mut self) {
        self.printed = 0;
    }

    fn new_lines<'a>(&mut self, snapshot: &'a MachineSnapshot) -> &'a [String] {
        // Missed the run start after a lagged receive.
        if snapshot.log.len() < self.printed {
            self.printed = 0;
        }
        let fresh = &snapshot.log[self.printed..];
        self.printed = snapshot.log.len();
        fresh
    }

    fn print_new(&mut self, snapshot: &MachineSnapshot) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        for line in self.new_lines(snapshot) {
            println!("{stamp} {}", view::render_log_line(line));
        }
    }
}

/// Tracks one submitted run. The snapshot right after `RunStarted` is the
/// local reset and still carries the previous status; any later terminal
/// status ends the run.
#[derive(Debug, Default)]
struct RunFollower {
    started: bool,
    awaiting_reset: bool,
}

impl RunFollower {
    fn run_started(&mut self) {
        self.started = true;
        self.awaiting_reset = true;
    }

    /// Only called once the submit succeeded, so the run has started even if
    /// its announcement was among the dropped events.
    fn lagged(&mut self) {
        self.started = true;
        self.awaiting_reset = false;
    }

    fn is_done(&mut self, snapshot: &MachineSnapshot) -> bool {
        if !self.started {
            return false;
        }
        if self.awaiting_reset {
            self.awaiting_reset = false;
            return false;
        }
        snapshot.status.is_terminal()
    }
}
