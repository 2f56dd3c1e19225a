//! `tally` - replay a JSON book script and print its reports.

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tally_cli::{Script, replay};
use tally_core::TenantId;
use tally_infra::LedgerConfig;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Double-entry ledger posting engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a book script and print the resulting reports as JSON
    Run {
        /// Script file, or `-` for stdin
        script: PathBuf,

        /// Pretty-print the JSON output
        #[arg(short, long)]
        pretty: bool,

        /// Book to write into, overriding the script's `tenant_id`
        #[arg(long)]
        tenant: Option<TenantId>,
    },
    /// Print the configuration resolved from the environment
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = LedgerConfig::from_env().context("invalid TALLY_* configuration")?;

    match cli.command {
        Commands::Run {
            script,
            pretty,
            tenant,
        } => {
            let mut script = read_script(&script)?;
            script.tenant_id = tenant.or(script.tenant_id);
            let filter = script
                .config
                .as_ref()
                .map_or(config.log_filter.as_str(), |c| c.log_filter.as_str());
            tally_observability::init_with_filter(filter);

            let report = replay(&script, config)?;
            let json = if pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            println!("{json}");
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn read_script(path: &PathBuf) -> anyhow::Result<Script> {
    let json = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read script from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    Script::from_json(&json).with_context(|| format!("invalid book script {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_flag_parses_an_identifier() {
        let tenant_id = TenantId::new();
        let cli = Cli::try_parse_from(["tally", "run", "book.json", "--tenant", &tenant_id.to_string()])
            .unwrap();
        match cli.command {
            Commands::Run { tenant, pretty, .. } => {
                assert_eq!(tenant, Some(tenant_id));
                assert!(!pretty);
            }
            Commands::Config => panic!("expected run"),
        }
    }

    #[test]
    fn malformed_tenant_is_rejected() {
        let err = Cli::try_parse_from(["tally", "run", "book.json", "--tenant", "not-a-uuid"])
            .err()
            .unwrap();
        assert!(err.to_string().contains("invalid identifier"));
    }
}
