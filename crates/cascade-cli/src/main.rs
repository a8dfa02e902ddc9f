//! Cascade CLI main entry point

use cascade_cli::{
    cli::{Cli, Commands},
    commands::{CompileCommand, ListCommand, RunArgs, RunCommand},
    error::CliResult,
    utils::{init_tracing, ColoredOutput},
};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {}", ColoredOutput::error("Error:"), e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    init_tracing()?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    info!("Cascade CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Compile { action, file, format } => {
            CompileCommand::run(&cli.config, action.as_deref(), file.as_deref(), format)
        }

        Commands::Run {
            action,
            input,
            input_file,
            session,
            session_file,
            format,
            output,
            diagnostics,
            timeout,
        } => {
            let args = RunArgs {
                action,
                input,
                input_file,
                session,
                session_file,
                format,
                output,
                diagnostics,
                timeout,
            };
            RunCommand::run(&cli.config, args).await
        }

        Commands::List { format } => ListCommand::run(&cli.config, format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_cli::OutputFormat;

    #[test]
    fn parses_run_command() {
        let cli = Cli::try_parse_from([
            "cascade",
            "--config",
            "/tmp/manifest.yaml",
            "run",
            "unit_add",
            "--input",
            r#"{"name": "x"}"#,
            "--format",
            "json",
            "--diagnostics",
        ])
        .unwrap();

        assert_eq!(cli.config, "/tmp/manifest.yaml");
        if let Commands::Run { action, input, format, diagnostics, .. } = cli.command {
            assert_eq!(action, "unit_add");
            assert_eq!(input.as_deref(), Some(r#"{"name": "x"}"#));
            assert_eq!(format, OutputFormat::Json);
            assert!(diagnostics);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn compile_sources_conflict() {
        let parsed = Cli::try_parse_from(["cascade", "compile", "unit_add", "--file", "a.yaml"]);
        assert!(parsed.is_err());
    }
}
