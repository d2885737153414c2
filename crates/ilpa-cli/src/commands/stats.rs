use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use ilpa_server::config::MemoryConfig;
use ilpa_server::memory::LIFE_COACH_AGENT;
use ilpa_server::storage::{ConversationLog, LanceStore, MemoryStore};
use serde::Serialize;

use crate::error::CliResult;
use crate::output::OutputFormat;

#[derive(Parser)]
pub struct StatsCommand {
    #[clap(help = "User to report on")]
    pub user_id: String,

    #[clap(long, short, default_value = LIFE_COACH_AGENT, help = "Agent type")]
    pub agent: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct UserStats {
    pub user_id: String,
    pub agent_type: String,
    pub memory_entries: usize,
    pub buffer_capacity: usize,
    pub utilization_percent: f64,
    pub messages: usize,
    pub total_memory_entries: usize,
    pub total_messages: usize,
}

impl StatsCommand {
    pub async fn execute(
        &self,
        store: &LanceStore,
        memory_config: &MemoryConfig,
        format: OutputFormat,
    ) -> CliResult<()> {
        let stats = self.collect(store, memory_config).await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            OutputFormat::Table => {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Metric", "Value"]);

                table.add_row(["User".to_string(), stats.user_id.clone()]);
                table.add_row(["Agent".to_string(), stats.agent_type.clone()]);
                table.add_row([
                    "Memory entries".to_string(),
                    format!("{} / {}", stats.memory_entries, stats.buffer_capacity),
                ]);
                table.add_row([
                    "Buffer utilization".to_string(),
                    format!("{:.1}%", stats.utilization_percent),
                ]);
                table.add_row(["Messages".to_string(), stats.messages.to_string()]);
                table.add_row([
                    "All memory entries".to_string(),
                    stats.total_memory_entries.to_string(),
                ]);
                table.add_row(["All messages".to_string(), stats.total_messages.to_string()]);

                println!("{table}");

                if stats.memory_entries > stats.buffer_capacity {
                    println!(
                        "\nBuffer is over capacity; run `ilpa-cli memory prune {}` to trim it.",
                        stats.user_id
                    );
                }
            }
        }

        Ok(())
    }

    pub async fn collect(
        &self,
        store: &LanceStore,
        memory_config: &MemoryConfig,
    ) -> CliResult<UserStats> {
        let memory_entries = store.count_memories(&self.user_id, &self.agent).await?;
        let messages = store.recent_messages(&self.user_id, usize::MAX).await?.len();
        let buffer_capacity = memory_config.buffer_capacity;

        Ok(UserStats {
            user_id: self.user_id.clone(),
            agent_type: self.agent.clone(),
            memory_entries,
            buffer_capacity,
            utilization_percent: utilization(memory_entries, buffer_capacity),
            messages,
            total_memory_entries: store.total_memories().await?,
            total_messages: store.total_messages().await?,
        })
    }
}

fn utilization(entries: usize, capacity: usize) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    entries as f64 / capacity as f64 * 100.0
}
