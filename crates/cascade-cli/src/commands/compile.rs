//! Compile a declarative action definition

use crate::cli::OutputFormat;
use crate::error::CliResult;
use crate::utils::validate_file_exists;
use cascade_config::ConfigLoader;
use tracing::info;

pub struct CompileCommand;

impl CompileCommand {
    /// Compile `action` from the manifest, or the standalone definition `file`
    pub fn run(
        config: &str,
        action: Option<&str>,
        file: Option<&str>,
        format: OutputFormat,
    ) -> CliResult<()> {
        println!("{}", Self::render(config, action, file, format)?);
        Ok(())
    }

    pub fn render(
        config: &str,
        action: Option<&str>,
        file: Option<&str>,
        format: OutputFormat,
    ) -> CliResult<String> {
        let loader = ConfigLoader::new();
        let compiled = match (action, file) {
            (_, Some(file)) => {
                validate_file_exists(file)?;
                loader.load_action_file(file)?
            }
            (Some(name), None) => {
                validate_file_exists(config)?;
                loader.load_from_file(config)?.action(name)?
            }
            (None, None) => {
                return Err(crate::error::CliError::InvalidArgument(
                    "either an action name or --file is required".to_string(),
                ))
            }
        };

        info!(sub_actions = compiled.on.len(), "Action compiled");
        format.format_json(&serde_json::to_value(&compiled)?)
    }
}
