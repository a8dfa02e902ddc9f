//! List providers and actions of a manifest

use crate::cli::OutputFormat;
use crate::error::CliResult;
use crate::utils::{validate_file_exists, ColoredOutput};
use cascade_config::{ConfigLoader, ConfigManifest};
use serde_json::json;

pub struct ListCommand;

impl ListCommand {
    pub fn run(config: &str, format: OutputFormat) -> CliResult<()> {
        validate_file_exists(config)?;
        let manifest = ConfigLoader::new().load_from_file(config)?;

        if format == OutputFormat::Table {
            Self::print_table(&manifest);
            return Ok(());
        }

        let listing = json!({
            "providers": manifest
                .providers
                .iter()
                .map(|p| json!({"name": p.name, "type": p.kind, "connectType": p.connect_type}))
                .collect::<Vec<_>>(),
            "actions": manifest.action_names(),
        });
        println!("{}", format.format_json(&listing)?);
        Ok(())
    }

    fn print_table(manifest: &ConfigManifest) {
        println!("{}", ColoredOutput::highlight("Providers"));
        for provider in &manifest.providers {
            println!(
                "  {:<24} {:<14} {}",
                provider.name,
                provider.kind,
                ColoredOutput::dim(&format!("{:?}", provider.connect_type))
            );
        }
        println!("{}", ColoredOutput::highlight("Actions"));
        for name in manifest.action_names() {
            println!("  {}", name);
        }
    }
}
