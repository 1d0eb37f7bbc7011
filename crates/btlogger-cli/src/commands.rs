//! Command handlers for the BTLogger CLI

use tracing::{info, warn};

use btlogger_ble::BtleplugLink;
use btlogger_core::{LogRecord, WireCodec};
use btlogger_runtime::session_log::format_record_line;
use btlogger_runtime::{SchedulerBuilder, SessionFileInfo, SessionLog};

use crate::cli::Commands;
use crate::config::AppConfig;
use crate::console::ConsolePresentation;
use crate::error::Result;

pub struct CommandDispatcher;

impl CommandDispatcher {
    pub async fn execute(command: Commands, config: AppConfig) -> Result<()> {
        match command {
            Commands::Run { no_auto_connect } => Self::handle_run(config, no_auto_connect).await,
            Commands::Sessions { json } => Self::handle_sessions(config, json),
            Commands::Show { path } => Self::handle_show(config, &path),
            Commands::Delete { path } => Self::handle_delete(config, &path),
            Commands::Decode { hex: frame } => {
                println!("{}", Self::handle_decode(&frame)?);
                Ok(())
            }
            Commands::Config => {
                print!("{}", config.to_toml()?);
                Ok(())
            }
        }
    }

    /// Run the receiver until Ctrl-C
    async fn handle_run(config: AppConfig, no_auto_connect: bool) -> Result<()> {
        let auto_connect = config.link.auto_connect && !no_auto_connect;
        let link_config = config.link.with_auto_connect(auto_connect);
        let link = BtleplugLink::new().await?;

        let mut scheduler = SchedulerBuilder::new()
            .with_scheduler_config(config.scheduler)
            .with_storage_config(config.storage)
            .with_link_config(link_config)
            .build(link, ConsolePresentation::new())?;
        scheduler.start()?;
        info!("Receiving logs, press Ctrl-C to stop");

        tokio::signal::ctrl_c().await?;
        info!("Stopping");

        let report = scheduler.stop().await;
        if !report.graceful {
            warn!("Forced to abort: {}", report.forced_contexts.join(", "));
        }
        Ok(())
    }

    fn handle_sessions(config: AppConfig, json: bool) -> Result<()> {
        let root = config.storage.root.clone();
        let files = SessionLog::new(config.storage).list_sessions();

        if json {
            println!("{}", serde_json::to_string_pretty(&files)?);
        } else if files.is_empty() {
            println!("No session files under {}", root.display());
        } else {
            for file in &files {
                println!("{}", Self::describe(file));
            }
        }
        Ok(())
    }

    fn describe(file: &SessionFileInfo) -> String {
        let state = if file.open { " (open)" } else { "" };
        format!("{:<48} {:>10} bytes{}", file.path, file.size, state)
    }

    fn handle_show(config: AppConfig, path: &str) -> Result<()> {
        let storage = SessionLog::new(config.storage);
        for line in storage.load_session(path)? {
            println!("{}", line);
        }
        Ok(())
    }

    fn handle_delete(config: AppConfig, path: &str) -> Result<()> {
        let mut storage = SessionLog::new(config.storage);
        if storage.delete_file(path)? {
            println!("Deleted {}", path);
        } else {
            println!("No session file at {}", path);
        }
        Ok(())
    }

    /// Decode a frame as the receiver would, stamping legacy text at 0 ms
    fn handle_decode(frame: &str) -> Result<String> {
        let cleaned: String = frame
            .trim()
            .trim_start_matches("0x")
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':')
            .collect();
        let bytes = hex::decode(cleaned)?;
        let record: LogRecord = WireCodec::decode(&bytes, 0)?;
        Ok(format_record_line(&record).trim_end().to_string())
    }
}
