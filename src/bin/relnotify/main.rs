use relnotify::{Command, DryRun, Forge, GitHub, RetryPolicy, parse_args, prune_nightlies, run};
use tracing::{info, warn};

fn handle_clap_help_version(clap_err: &clap::Error) -> ! {
    use clap::error::ErrorKind;
    match clap_err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            print!("{clap_err}");
            std::process::exit(0);
        }
        _ => {
            eprint!("{clap_err}");
            std::process::exit(2);
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn execute<F>(command: &Command, forge: &F) -> anyhow::Result<()>
where
    F: Forge + Sync,
{
    match command {
        Command::Comment(config) => {
            let summary = run(config, forge).await?;
            summary.log();
            summary.ensure_success()?;
        }
        Command::PruneNightlies(config) => {
            let report = prune_nightlies(config, forge).await?;
            info!(
                deleted = report.completed.len(),
                failed = report.failures.len(),
                "nightly releases pruned"
            );
            report.ensure_success()?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let command = match parse_args(std::env::args()) {
        Ok(command) => command,
        Err(err) => {
            if let Some(clap_err) = err.downcast_ref::<clap::Error>() {
                handle_clap_help_version(clap_err);
            } else {
                return Err(err);
            }
        }
    };

    let config = command.config();
    let github = GitHub::from_env(RetryPolicy::new(config.max_rate_limit_wait))?;

    if config.dry_run {
        warn!(repo = %config.repo, tag = config.tag(), "dry run: no changes will be made");
        execute(&command, &DryRun::new(github)).await
    } else {
        execute(&command, &github).await
    }
}
