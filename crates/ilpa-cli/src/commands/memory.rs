use std::sync::Arc;

use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use ilpa_server::config::MemoryConfig;
use ilpa_server::memory::{LIFE_COACH_AGENT, RetentionEnforcer};
use ilpa_server::storage::{LanceStore, MemoryStore};
use serde::Serialize;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, truncate_string};

#[derive(Parser)]
pub struct MemoryCommand {
    #[clap(subcommand)]
    pub command: MemorySubcommand,
}

#[derive(Subcommand)]
pub enum MemorySubcommand {
    #[clap(about = "List the memory buffer of a user, newest first")]
    List(ListArgs),

    #[clap(about = "Run one retention pass now")]
    Prune(PruneArgs),
}

#[derive(Parser)]
pub struct ListArgs {
    #[clap(help = "User whose memory buffer to list")]
    pub user_id: String,

    #[clap(long, short, default_value = LIFE_COACH_AGENT, help = "Agent type")]
    pub agent: String,

    #[clap(
        long,
        short,
        default_value = "20",
        help = "Maximum number of entries to display"
    )]
    pub limit: usize,
}

#[derive(Parser)]
pub struct PruneArgs {
    #[clap(help = "User whose memory buffer to prune")]
    pub user_id: String,

    #[clap(long, short, default_value = LIFE_COACH_AGENT, help = "Agent type")]
    pub agent: String,

    #[clap(long, help = "Entries to keep (defaults to memory.buffer_capacity)")]
    pub capacity: Option<usize>,
}

/// Outcome of a manual retention pass
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PruneReport {
    pub user_id: String,
    pub agent_type: String,
    pub capacity: usize,
    pub removed: usize,
    pub remaining: usize,
}

impl MemoryCommand {
    pub async fn execute(
        &self,
        store: &Arc<LanceStore>,
        memory_config: &MemoryConfig,
        format: OutputFormat,
    ) -> CliResult<()> {
        match &self.command {
            MemorySubcommand::List(args) => Self::list(store, args, format).await,
            MemorySubcommand::Prune(args) => {
                let report = prune(store, memory_config, args).await?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                    OutputFormat::Table => println!(
                        "Removed {} entries for {} ({}); {} remain (capacity {})",
                        report.removed,
                        report.user_id,
                        report.agent_type,
                        report.remaining,
                        report.capacity
                    ),
                }
                Ok(())
            }
        }
    }

    async fn list(store: &LanceStore, args: &ListArgs, format: OutputFormat) -> CliResult<()> {
        let entries = store
            .recent_memories(&args.user_id, &args.agent, args.limit)
            .await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            }
            OutputFormat::Table => {
                if entries.is_empty() {
                    println!("No memory entries found.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["ID", "Content", "Session", "Created"]);

                for entry in &entries {
                    table.add_row([
                        entry.id.to_string(),
                        truncate_string(&entry.content, 60),
                        entry
                            .session_id
                            .as_deref()
                            .map(|s| truncate_string(s, 12))
                            .unwrap_or_else(|| "-".to_string()),
                        format_timestamp(&entry.timestamp),
                    ]);
                }

                println!("{table}");
                println!("\nTotal: {} entries", entries.len());
            }
        }

        Ok(())
    }
}

/// Run a single retention pass, reporting the first failure instead of hiding it
pub async fn prune(
    store: &Arc<LanceStore>,
    memory_config: &MemoryConfig,
    args: &PruneArgs,
) -> CliResult<PruneReport> {
    let capacity = args.capacity.unwrap_or(memory_config.buffer_capacity);
    if capacity == 0 {
        return Err("capacity must be positive".into());
    }

    let enforcer = RetentionEnforcer::new(store.clone(), memory_config).with_capacity(capacity);
    let removed = enforcer
        .try_enforce(&args.user_id, &args.agent)
        .await
        .map_err(|e| format!("Prune failed: {e}"))?;
    let remaining = store.count_memories(&args.user_id, &args.agent).await?;

    Ok(PruneReport {
        user_id: args.user_id.clone(),
        agent_type: args.agent.clone(),
        capacity,
        removed,
        remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ilpa_server::memory::NewMemoryEntry;
    use tempfile::TempDir;

    async fn seeded_store(count: usize) -> (Arc<LanceStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LanceStore::open(dir.path()).await.unwrap());
        for i in 0..count {
            store
                .append_memory(NewMemoryEntry::new(
                    "u1",
                    LIFE_COACH_AGENT,
                    format!("User: {i}"),
                    None,
                ))
                .await
                .unwrap();
        }
        (store, dir)
    }

    fn prune_args(capacity: Option<usize>) -> PruneArgs {
        PruneArgs {
            user_id: "u1".to_string(),
            agent: LIFE_COACH_AGENT.to_string(),
            capacity,
        }
    }

    #[tokio::test]
    async fn test_prune_with_explicit_capacity() {
        let (store, _dir) = seeded_store(6).await;

        let report = prune(&store, &MemoryConfig::default(), &prune_args(Some(2)))
            .await
            .unwrap();
        assert_eq!(
            report,
            PruneReport {
                user_id: "u1".to_string(),
                agent_type: LIFE_COACH_AGENT.to_string(),
                capacity: 2,
                removed: 4,
                remaining: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_prune_defaults_to_configured_capacity() {
        let (store, _dir) = seeded_store(3).await;

        let report = prune(&store, &MemoryConfig::default(), &prune_args(None))
            .await
            .unwrap();
        assert_eq!(report.capacity, 100);
        assert_eq!(report.removed, 0);
        assert_eq!(report.remaining, 3);
    }

    #[tokio::test]
    async fn test_prune_rejects_zero_capacity() {
        let (store, _dir) = seeded_store(1).await;
        assert!(
            prune(&store, &MemoryConfig::default(), &prune_args(Some(0)))
                .await
                .is_err()
        );
    }
}
