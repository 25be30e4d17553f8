use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "unitmap")]
#[command(about = "Assign applications to business units by their four-letter (AAAA-) name prefix")]
struct Cli {
    /// Resolve and report every change without creating business units or updating applications.
    #[arg(long)]
    dry_run: bool,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unitmap_sync=info,unitmap_adapters=info,unitmap_storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match unitmap_sync::run_once_from_env(cli.dry_run).await {
        Ok(summary) => {
            println!(
                "reconcile complete: run_id={} dry_run={} applications={} assigned={} already_in_bu={} skipped={} report={}",
                summary.run_id,
                summary.dry_run,
                summary.tally.applications,
                summary.tally.assigned,
                summary.tally.already_in_bu,
                summary.tally.skipped_no_guid + summary.tally.skipped_name_format,
                summary.report_path.as_deref().unwrap_or("-")
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
