use crate::ui::{self, Status};
use anyhow::Result;
use exporter_collectors::load_config_from_file;
use std::path::PathBuf;

pub async fn execute(config_file: PathBuf) -> Result<()> {
    ui::section("validate");
    println!("File: {}\n", config_file.display());

    match load_config_from_file(&config_file).await {
        Ok(config) => {
            ui::status(Status::Ok, "Configuration is valid");
            println!("\nSettings:");
            ui::print_config(&config);

            if config.call_timeout >= config.update_interval {
                println!();
                ui::status(Status::Warn, "call_timeout is not shorter than update_interval");
            }

            Ok(())
        }
        Err(e) => {
            ui::status(Status::Fail, &format!("Configuration is invalid: {:#}", e));
            Err(e)
        }
    }
}
