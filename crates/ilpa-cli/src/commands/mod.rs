pub mod config;
pub mod history;
pub mod memory;
pub mod stats;

pub use config::ConfigCommand;
pub use history::HistoryCommand;
pub use memory::MemoryCommand;
pub use stats::StatsCommand;
