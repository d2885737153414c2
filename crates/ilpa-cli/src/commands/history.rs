use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use ilpa_server::storage::{ConversationLog, LanceStore};

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, truncate_string};

#[derive(Parser)]
pub struct HistoryCommand {
    #[clap(help = "User whose conversation history to show")]
    pub user_id: String,

    #[clap(
        long,
        short,
        default_value = "20",
        help = "Maximum number of messages to display"
    )]
    pub limit: usize,
}

impl HistoryCommand {
    pub async fn execute(&self, store: &LanceStore, format: OutputFormat) -> CliResult<()> {
        let messages = store.recent_messages(&self.user_id, self.limit).await?;

        match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&messages)?);
            }
            OutputFormat::Table => {
                if messages.is_empty() {
                    println!("No conversation history for {}.", self.user_id);
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Time", "Speaker", "Content", "Session"]);

                // Oldest first reads like a transcript
                for message in messages.iter().rev() {
                    table.add_row([
                        format_timestamp(&message.timestamp),
                        message.message_type.speaker_label().to_string(),
                        truncate_string(&message.content, 60),
                        message
                            .session_id
                            .as_deref()
                            .map(|s| truncate_string(s, 12))
                            .unwrap_or_else(|| "-".to_string()),
                    ]);
                }

                println!("{table}");
                println!("\nShowing {} most recent messages", messages.len());
            }
        }

        Ok(())
    }
}
