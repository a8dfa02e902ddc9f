//! Execute an action from the manifest

use crate::cli::OutputFormat;
use crate::error::{CliError, CliResult};
use crate::providers::build_registry;
use crate::utils::{read_json_input, validate_file_exists, write_output_data, ColoredOutput};
use cascade_config::ConfigLoader;
use cascade_provider::MemorySession;
use cascade_runtime::{ActionResponse, ExecuteOptions, Executor};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct RunArgs {
    pub action: String,
    pub input: Option<String>,
    pub input_file: Option<String>,
    pub session: Option<String>,
    pub session_file: Option<String>,
    pub format: OutputFormat,
    pub output: Option<String>,
    pub diagnostics: bool,
    pub timeout: u64,
}

pub struct RunCommand;

impl RunCommand {
    pub async fn run(config: &str, args: RunArgs) -> CliResult<()> {
        let response = Self::execute(config, &args).await?;

        if let Some(error) = &response.error {
            warn!("Action execution failed: {}", error);
            println!("{} {}", ColoredOutput::error("Error:"), error);
            return Err(CliError::ExecutionFailed(error.clone()));
        }

        let formatted = args.format.format_json(&serde_json::to_value(&response)?)?;
        match &args.output {
            Some(file) => {
                write_output_data(file, &formatted)?;
                println!("{} Output written to: {}", ColoredOutput::success("✓"), file);
            }
            None => println!("{}", formatted),
        }
        Ok(())
    }

    /// Load the manifest, build the providers and execute `args.action`
    pub async fn execute(config: &str, args: &RunArgs) -> CliResult<ActionResponse> {
        validate_file_exists(config)?;
        info!("Loading manifest from {}", config);
        let manifest = ConfigLoader::new().load_from_file(config)?;
        let action = manifest.action(&args.action)?;
        let registry = build_registry(&manifest.providers)?;

        let input = read_json_input(args.input.clone(), args.input_file.clone())?;
        let session = MemorySession::new(read_json_input(
            args.session.clone(),
            args.session_file.clone(),
        )?);

        let cancellation = CancellationToken::new();
        let deadline = cancellation.clone();
        let timeout = Duration::from_secs(args.timeout);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            deadline.cancel();
        });

        let options = ExecuteOptions::default()
            .with_connect_place(format!("cli:{}", args.action))
            .with_cancellation(cancellation)
            .with_diagnostics(args.diagnostics);

        info!(action = %args.action, "Executing action");
        let response =
            Executor::new(registry).execute_logged(&action, &input, &session, options).await;
        timer.abort();
        Ok(response)
    }
}
