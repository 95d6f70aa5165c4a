//! # Vellum CLI
//!
//! Walks through the store's behaviour on the in-memory engine: read-through
//! caching, replication paused around local bursts, content-addressed saves,
//! remote changes winning over local writes, and store switching.
//!
//! Every engine and replication call is printed from the provider's call
//! log, so the effect of each store operation is visible:
//!
//! ```text
//! query grid-1   →  cancel, find(id=grid-1)        (cache miss)
//! query grid-1   →  (nothing)                      (cache hit)
//! ```

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;
use vellum_core::{DocumentKind, Envelope, ImageAsset};
use vellum_store::{
    Call, ChangeBatch, MemoryProvider, QueryResult, SaveOutcome, StoreConfigBuilder, StoreError,
    StoreManager,
};

type Result<T> = std::result::Result<T, StoreError>;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "vellum-cli")]
#[command(about = "Offline-first document store scenarios (in-memory engine)")]
#[command(version)]
struct Cli {
    /// Grace period in milliseconds before replication resumes
    #[arg(long, default_value_t = 300)]
    grace_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Basic demo: cache hits, cache misses and sync pause/resume
    Demo,
    /// Content-addressed saves: identical payloads are stored once
    Dedup,
    /// Remote changes against local writes: the remote value wins
    Conflict,
    /// Local-only stores: switching, resetting and deleting
    Offline,
    /// Interactive REPL for manual experimentation
    Interactive,
}

// ─── Session: one manager over one in-memory provider ──────────────────────

struct Session {
    provider: Arc<MemoryProvider>,
    manager: StoreManager<MemoryProvider>,
    printed: usize,
}

impl Session {
    fn new(grace: Duration) -> Self {
        let provider = Arc::new(MemoryProvider::new());
        let config = StoreConfigBuilder::new()
            .resume_grace(grace)
            .initial_operation_estimate(Duration::ZERO)
            .build();
        Self {
            manager: StoreManager::new(provider.clone(), config),
            provider,
            printed: 0,
        }
    }

    /// Print the calls recorded since the last flush.
    fn flush_calls(&mut self) {
        let calls = self.provider.log().calls();
        let fresh = &calls[self.printed.min(calls.len())..];
        if fresh.is_empty() {
            println!("    {}", "(no engine or replication calls)".dimmed());
        }
        for call in fresh {
            println!("    {} {}", "↳".bright_black(), describe(call));
        }
        self.printed = calls.len();
    }

    fn skip_calls(&mut self) {
        self.printed = self.provider.log().calls().len();
    }
}

fn describe(call: &Call) -> ColoredString {
    match call {
        Call::Put { id, model_name } => format!("put {} ({})", id, model_name).bright_white(),
        Call::Find(selector) => {
            let mut parts = Vec::new();
            if let Some(model) = &selector.model_name {
                parts.push(format!("model={}", model));
            }
            if let Some(id) = &selector.id {
                parts.push(format!("id={}", id));
            }
            format!("find({})", parts.join(", ")).bright_white()
        }
        Call::AllDocs => "all_docs".bright_white(),
        Call::Remove { id } => format!("remove {}", id).bright_white(),
        Call::Destroy => "destroy".bright_red(),
        Call::Close => "close".dimmed(),
        Call::Start { remote } => format!("start sync with {}", remote).bright_cyan(),
        Call::Cancel => "pause replication".bright_yellow(),
        Call::Resume => "resume replication".bright_green(),
    }
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn outcome(outcome: &SaveOutcome) -> ColoredString {
    match outcome {
        SaveOutcome::Written { revision } => format!("written as {}", revision).bright_green(),
        SaveOutcome::ConflictIgnored => "conflict, remote value kept".bright_yellow(),
        SaveOutcome::Unchanged => "unchanged".dimmed(),
    }
}

fn show_result(result: &QueryResult) {
    match result {
        QueryResult::None => println!("    {}", "(nothing)".dimmed()),
        QueryResult::One(doc) => show_envelope(doc),
        QueryResult::Many(docs) => docs.iter().for_each(show_envelope),
    }
}

fn show_envelope(doc: &Envelope) {
    let payload: String = doc.encrypted_payload.chars().take(40).collect();
    println!(
        "    {} {} {} {}",
        doc.id.bright_yellow(),
        format!("[{}]", doc.model_name).bright_magenta(),
        doc.revision.as_deref().unwrap_or("-").dimmed(),
        payload
    );
}

fn grid(id: &str, payload: &str) -> Envelope {
    Envelope::new(id, "GridData", payload)
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn run_demo(grace: Duration) -> Result<()> {
    header("DEMO — Read-Through Cache & Sync Pausing");
    let mut session = Session::new(grace);

    section("Phase 1: Open a store replicating with a remote");
    let store = session
        .manager
        .open("alice", Some("https://couch.example/alice"), false)
        .await?;
    session.flush_calls();
    step(&format!("sync state: {}", store.sync_state()));

    section("Phase 2: A burst of local operations");
    for (id, payload) in [("grid-1", "{\"rows\":4}"), ("grid-2", "{\"rows\":6}")] {
        let result = store.save(grid(id, payload)).await?;
        step(&format!("save {}: {}", id, outcome(&result)));
        session.flush_calls();
    }
    step(&format!(
        "sync state during the burst: {}",
        store.sync_state().to_string().bright_yellow()
    ));

    section("Phase 3: Reads");
    step("query grid-1 (cached by the save)");
    show_result(&store.query(None, Some("grid-1")).await?);
    session.flush_calls();

    store
        .engine()
        .insert_raw(grid("grid-3", "{\"rows\":2}"));
    step("query grid-3 (written behind the store's back, cache miss)");
    show_result(&store.query(None, Some("grid-3")).await?);
    session.flush_calls();

    step("query grid-3 again (now cached)");
    show_result(&store.query(None, Some("grid-3")).await?);
    session.flush_calls();

    section("Phase 4: Idle");
    let delay = store.scheduler().resume_delay();
    step(&format!("waiting {:?} for the scheduled resume", delay));
    tokio::time::sleep(delay + Duration::from_millis(50)).await;
    session.flush_calls();
    step(&format!(
        "sync state: {}",
        store.sync_state().to_string().bright_green()
    ));
    Ok(())
}

// ─── Dedup ─────────────────────────────────────────────────────────────────

async fn run_dedup(grace: Duration) -> Result<()> {
    header("DEDUP — Content-Addressed Image Storage");
    let mut session = Session::new(grace);
    let store = session.manager.open("alice", None, false).await?;
    session.skip_calls();

    section("Phase 1: Save the same picture three times");
    let mut ids = Vec::new();
    for label in ["first", "second", "third"] {
        let id = store
            .save_content_addressed(ImageAsset::new("data:image/png;base64,iVBORw0KGgo"))
            .await?;
        step(&format!("{} save → {}", label, id.bright_yellow()));
        session.flush_calls();
        ids.push(id);
    }

    section("Phase 2: A different picture");
    let other = store
        .save_content_addressed(ImageAsset::new("data:image/png;base64,R0lGODlh"))
        .await?;
    step(&format!("different content → {}", other.bright_yellow()));
    session.flush_calls();

    section("Result");
    let stored = store.engine().count_model(ImageAsset::MODEL_NAME);
    if ids.windows(2).all(|w| w[0] == w[1]) && stored == 2 {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            format!("{} saves, {} stored images", ids.len() + 1, stored)
                .bright_green()
                .bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            format!("expected 2 stored images, found {}", stored)
                .bright_red()
                .bold()
        );
    }
    let metadata = store.metadata().await?;
    for (kind, hashes) in &metadata.hash_codes {
        step(&format!("index {}: {} hash(es)", kind, hashes.len()));
    }
    Ok(())
}

// ─── Conflict ──────────────────────────────────────────────────────────────

async fn run_conflict(grace: Duration) -> Result<()> {
    header("CONFLICT — Remote Changes Win Over Local Writes");
    let mut session = Session::new(grace);
    let store = session
        .manager
        .open("bob", Some("https://couch.example/bob"), false)
        .await?;
    let mut events = store.subscribe();

    section("Phase 1: Local write");
    let result = store.save(grid("grid-1", "{\"title\":\"local\"}")).await?;
    step(&format!("save grid-1: {}", outcome(&result)));

    section("Phase 2: Remote change arrives for the same document");
    let replication = session
        .provider
        .replication("bob")
        .ok_or_else(|| StoreError::Rejected("no replication session".into()))?;
    replication.deliver(ChangeBatch::new(vec![grid(
        "grid-1",
        "{\"title\":\"remote\"}",
    )]));
    match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
        Ok(Ok(event)) => step(&format!(
            "change event: {:?} for {}",
            event.kind,
            event.ids.join(", ")
        )),
        _ => step(&"no change event arrived".bright_red().to_string()),
    }
    step("cache now holds:");
    show_result(&store.query(None, Some("grid-1")).await?);

    section("Phase 3: Stale local write (old revision)");
    let stale = grid("grid-1", "{\"title\":\"stale\"}");
    session.skip_calls();
    let result = store.save(stale).await?;
    step(&format!("save grid-1: {}", outcome(&result)));
    session.flush_calls();
    step("the store still serves:");
    show_result(&store.query(None, Some("grid-1")).await?);
    Ok(())
}

// ─── Offline ───────────────────────────────────────────────────────────────

async fn run_offline(grace: Duration) -> Result<()> {
    header("OFFLINE — Local Stores, Switching, Reset & Delete");
    let session = Session::new(grace);
    let local_default = session.manager.config().local_default_name.clone();

    section("Phase 1: Work in the local default store");
    let store = session.manager.open(&local_default, None, false).await?;
    store.save(grid("grid-1", "{\"rows\":3}")).await?;
    step(&format!(
        "{} holds {} document(s), sync: {}",
        local_default,
        store.all().await?.len(),
        store.sync_state()
    ));

    section("Phase 2: Log in as carol (switches stores)");
    let carol = session
        .manager
        .create("carol", Some("https://couch.example/carol"), false)
        .await?;
    step(&format!(
        "previous store open: {}",
        if store.is_open() { "yes".bright_red() } else { "no".bright_green() }
    ));
    step(&format!(
        "carol synced before: {} → replication resumes without delay ({:?})",
        session.manager.markers().is_synced("carol"),
        carol.scheduler().resume_delay()
    ));

    section("Phase 3: Reset is only allowed for the local default store");
    match session.manager.reset_store().await {
        Err(e) => step(&format!("reset carol: {}", e.to_string().bright_yellow())),
        Ok(_) => step(&"reset carol unexpectedly succeeded".bright_red().to_string()),
    }
    let store = session.manager.open(&local_default, None, false).await?;
    step(&format!("back in {}: {} document(s)", local_default, store.all().await?.len()));
    let store = session.manager.reset_store().await?;
    step(&format!("after reset: {} document(s)", store.all().await?.len()));

    section("Phase 4: Delete carol's local database");
    session.manager.delete_store("carol").await?;
    step(&format!(
        "databases left: {}",
        session.provider.database_names().join(", ")
    ));
    session.manager.close_current().await?;
    step(&format!("sync state with nothing open: {}", session.manager.sync_state()));
    Ok(())
}

// ─── Interactive ───────────────────────────────────────────────────────────

async fn run_interactive(grace: Duration) -> Result<()> {
    header("INTERACTIVE — Vellum Store REPL");
    println!("  Type 'help' for commands.\n");

    let mut session = Session::new(grace);

    loop {
        let prompt = session
            .manager
            .opened_store_name()
            .unwrap_or_else(|| "-".to_string());
        print!("{} ", format!("vellum[{}]>", prompt).bright_cyan().bold());
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() || input.is_empty() {
            break;
        }
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        if matches!(parts[0], "quit" | "exit" | "q") {
            println!("  {}", "Goodbye!".dimmed());
            break;
        }
        if matches!(parts[0], "help" | "h" | "?") {
            println!("  open <name> [remote] | save <id> <model> <payload> | get <id>");
            println!("  list <model> | all | image <data> | rm <id> | remote <id> <payload>");
            println!("  status | reset | delete <name> | quit");
            continue;
        }
        if let Err(e) = interactive_command(&mut session, &parts).await {
            println!("  {} {}", "!".bright_red(), e);
        }
        session.flush_calls();
    }
    session.manager.close_current().await
}

async fn interactive_command(session: &mut Session, parts: &[&str]) -> Result<()> {
    let usage = |text: &str| StoreError::Rejected(format!("usage: {}", text));
    match parts[0] {
        "open" | "o" => {
            let name = parts.get(1).copied().ok_or_else(|| usage("open <name> [remote]"))?;
            let store = session.manager.open(name, parts.get(2).copied(), false).await?;
            step(&format!("opened {} ({})", store.name(), store.sync_state()));
        }
        "save" | "s" => {
            if parts.len() < 4 {
                return Err(usage("save <id> <model> <payload>"));
            }
            let store = session.manager.current()?;
            let mut envelope = Envelope::new(parts[1], parts[2], parts[3..].join(" "));
            if let Some(current) = store.cached(parts[1]) {
                envelope.internal_id = current.internal_id;
                envelope.revision = current.revision;
            }
            let result = store.save(envelope).await?;
            step(&outcome(&result).to_string());
        }
        "get" | "g" => {
            let id = parts.get(1).copied().ok_or_else(|| usage("get <id>"))?;
            show_result(&session.manager.current()?.query(None, Some(id)).await?);
        }
        "list" | "ls" => {
            let model = parts.get(1).copied().ok_or_else(|| usage("list <model>"))?;
            show_result(&session.manager.current()?.query(Some(model), None).await?);
        }
        "all" => show_result(&session.manager.current()?.all().await?),
        "image" | "img" => {
            let data = parts.get(1).copied().ok_or_else(|| usage("image <data>"))?;
            let id = session
                .manager
                .current()?
                .save_content_addressed(ImageAsset::new(data))
                .await?;
            step(&format!("stored as {}", id.bright_yellow()));
        }
        "rm" | "remove" => {
            let id = parts.get(1).copied().ok_or_else(|| usage("rm <id>"))?;
            session.manager.current()?.remove(id).await?;
            step(&format!("removed {}", id));
        }
        "remote" => {
            if parts.len() < 3 {
                return Err(usage("remote <id> <payload>"));
            }
            let store = session.manager.current()?;
            let replication = session
                .provider
                .replication(store.name())
                .ok_or_else(|| StoreError::Rejected("store has no replication".into()))?;
            let model = store
                .cached(parts[1])
                .map_or_else(|| "GridData".to_string(), |e| e.model_name);
            let mut events = store.subscribe();
            replication.deliver(ChangeBatch::new(vec![Envelope::new(
                parts[1],
                model,
                parts[2..].join(" "),
            )]));
            if let Ok(Ok(event)) =
                tokio::time::timeout(Duration::from_secs(1), events.recv()).await
            {
                step(&format!("remote change applied ({:?})", event.kind));
            }
        }
        "status" | "st" => {
            let manager = &session.manager;
            step(&format!(
                "store: {}",
                manager.opened_store_name().unwrap_or_else(|| "(none)".into())
            ));
            step(&format!("sync: {}", manager.sync_state()));
            if let Ok(store) = manager.current() {
                step(&format!(
                    "pending resume: {} (delay {:?})",
                    store.scheduler().has_pending_resume(),
                    store.scheduler().resume_delay()
                ));
            }
        }
        "reset" => {
            session.manager.reset_store().await?;
            step("local default store wiped");
        }
        "delete" => {
            let name = parts.get(1).copied().ok_or_else(|| usage("delete <name>"))?;
            session.manager.delete_store(name).await?;
            step(&format!("deleted {}", name));
        }
        other => {
            println!(
                "  {} Unknown command '{}', type 'help'",
                "?".bright_yellow(),
                other
            );
        }
    }
    Ok(())
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off")))
        .init();

    let cli = Cli::parse();
    let grace = Duration::from_millis(cli.grace_ms);

    let result = match cli.command {
        Commands::Demo => run_demo(grace).await,
        Commands::Dedup => run_dedup(grace).await,
        Commands::Conflict => run_conflict(grace).await,
        Commands::Offline => run_offline(grace).await,
        Commands::Interactive => run_interactive(grace).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}
