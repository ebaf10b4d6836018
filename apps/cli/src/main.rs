use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use servicehub_core::{DlqHistoryEntry, DlqStatus, ReplayHistoryEntry, ReplayOutcome, Rule};
use servicehub_query::DlqQueryService;
use servicehub_store::{DlqFilter, DlqStore, InMemoryDlqStore, InMemoryRuleStore};
use time::OffsetDateTime;

#[derive(Parser, Debug)]
#[command(author, version, about = "ServiceHub DLQ operator CLI")]
struct Cli {
    /// Emit JSON output
    #[arg(long, global = true)]
    json: bool,
    /// Path to the DLQ history snapshot (defaults to $SERVICEHUB_DLQ_SNAPSHOT_PATH)
    #[arg(long, global = true)]
    dlq_snapshot: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List DLQ entries, optionally scoped to a namespace or status
    List {
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show one DLQ entry and its timeline
    Show {
        id: i64,
    },
    /// Record a manual replay against a DLQ entry
    Replay {
        id: i64,
        #[arg(long, default_value = "operator")]
        by: String,
    },
    /// Dry-run a rule definition against the current backlog
    TestRule {
        /// Path to a JSON file containing a `Rule` definition
        rule_file: PathBuf,
        #[arg(long)]
        namespace: Option<String>,
    },
}

fn snapshot_path(explicit: Option<PathBuf>, env_var: &str, default: &str) -> PathBuf {
    explicit
        .or_else(|| std::env::var(env_var).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(default))
}

#[derive(Serialize)]
struct ListRow {
    id: i64,
    namespace_id: String,
    entity_name: String,
    failure_category: String,
    status: String,
    delivery_count: i64,
    dead_letter_reason: Option<String>,
}

fn list_row(entry: &DlqHistoryEntry) -> ListRow {
    ListRow {
        id: entry.id,
        namespace_id: entry.namespace_id.clone(),
        entity_name: entry.entity_name.clone(),
        failure_category: format!("{:?}", entry.failure_category),
        status: format!("{:?}", entry.status),
        delivery_count: entry.delivery_count,
        dead_letter_reason: entry.dead_letter_reason.clone(),
    }
}

fn print_table(rows: &[ListRow]) {
    println!(
        "{:<6} {:<12} {:<16} {:<16} {:<12} {:<6} {}",
        "ID", "NAMESPACE", "ENTITY", "CATEGORY", "STATUS", "TRIES", "REASON"
    );
    for row in rows {
        println!(
            "{:<6} {:<12} {:<16} {:<16} {:<12} {:<6} {}",
            row.id,
            row.namespace_id,
            row.entity_name,
            row.failure_category,
            row.status,
            row.delivery_count,
            row.dead_letter_reason.as_deref().unwrap_or("-"),
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let dlq_path = snapshot_path(cli.dlq_snapshot.clone(), "SERVICEHUB_DLQ_SNAPSHOT_PATH", "dlq.json");

    let dlq_store: Arc<dyn DlqStore> = Arc::new(InMemoryDlqStore::load_from_path(dlq_path)?);
    let query_service = DlqQueryService::new(dlq_store.clone());

    match cli.command {
        Commands::List {
            namespace,
            status,
            limit,
        } => {
            let status = status
                .map(|raw| parse_status(&raw))
                .transpose()?;
            let page = query_service
                .list(DlqFilter {
                    namespace_id: namespace,
                    status,
                    page: 1,
                    page_size: limit,
                    ..Default::default()
                })
                .await?;
            let rows: Vec<ListRow> = page.items.iter().map(list_row).collect();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No DLQ entries matched.");
            } else {
                print_table(&rows);
                println!("({} of {} total)", rows.len(), page.total);
            }
        }
        Commands::Show { id } => {
            let entry = query_service.get(id).await?;
            let timeline = query_service.timeline(id).await?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "entry": entry,
                        "timeline": timeline,
                    }))?
                );
            } else {
                println!("id               : {}", entry.id);
                println!("namespace        : {}", entry.namespace_id);
                println!("entity           : {}", entry.entity_name);
                println!("failure category : {:?}", entry.failure_category);
                println!("status           : {:?}", entry.status);
                println!("delivery count   : {}", entry.delivery_count);
                println!("reason           : {}", entry.dead_letter_reason.as_deref().unwrap_or("-"));
                println!("body preview     : {}", entry.body_preview);
                println!("timeline:");
                for event in &timeline {
                    println!("  {:?} at {}", event, event.at());
                }
            }
        }
        Commands::Replay { id, by } => {
            let entry = dlq_store.get(id).await?;
            if entry.status != DlqStatus::Active {
                bail!("dlq entry {id} is not active (status {:?}); nothing to replay", entry.status);
            }
            dlq_store
                .append_replay(
                    id,
                    ReplayHistoryEntry {
                        id: 0,
                        dlq_entry_id: id,
                        replayed_at: OffsetDateTime::now_utc(),
                        replayed_by: by.clone(),
                        strategy: "manual-cli".into(),
                        replayed_to_entity: entry.entity_name.clone(),
                        outcome_status: ReplayOutcome::Success,
                        new_dead_letter_reason: None,
                        error_details: None,
                    },
                    DlqStatus::Replayed,
                )
                .await?;
            println!("Recorded manual replay of entry {id} by {by}. Actual redelivery is performed by the running server's replay executor.");
        }
        Commands::TestRule { rule_file, namespace } => {
            let raw = std::fs::read_to_string(&rule_file)?;
            let rule: Rule = serde_json::from_str(&raw)?;
            let engine = servicehub_engine::RuleEngine::new(Arc::new(InMemoryRuleStore::new()));
            let sample = query_service
                .list(DlqFilter {
                    namespace_id: namespace,
                    page: 1,
                    page_size: 500,
                    ..Default::default()
                })
                .await?;
            let result = engine.test_rule(&rule, &sample.items)?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "tested": result.tested,
                        "matched": result.matched,
                        "sampleMatches": result.sample_matches,
                    }))?
                );
            } else {
                println!("tested : {}", result.tested);
                println!("matched: {}", result.matched);
                println!("sample : {:?}", result.sample_matches);
            }
        }
    }

    Ok(())
}

fn parse_status(raw: &str) -> Result<DlqStatus> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| anyhow::anyhow!("unknown dlq status {raw:?}"))
}
