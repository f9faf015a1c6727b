use std::path::{Path, PathBuf};

use anyhow::bail;
use clap::{command, value_parser, Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::EnvFilter;

use vault_backup::config::{parse_interval, validate_date_format, BackupSettings};
use vault_backup::engine::{BackupEngine, CycleOutcome, StatusReport};
use vault_backup::git_client::GitClient;
use vault_backup::service::BackupService;
use vault_backup::status::time_since;

fn cli() -> Command {
    command!()
        .subcommand_required(true)
        .arg(
            Arg::new("repo")
                .long("repo")
                .value_name("PATH")
                .help("Working directory to back up")
                .value_parser(value_parser!(PathBuf))
                .default_value(".")
                .global(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Settings file [default: $VAULT_BACKUP_CONFIG_HOME/config.toml]")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .subcommand(Command::new("serve").about("Back up on the configured interval until interrupted"))
        .subcommand(Command::new("backup").about("Commit all changes and push"))
        .subcommand(Command::new("pull").about("Pull from the remote"))
        .subcommand(
            Command::new("status")
                .about("Show the repository and pending changes")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("branch")
                .about("List local branches, or switch to NAME")
                .arg(Arg::new("name").value_name("NAME")),
        )
        .subcommand(
            Command::new("config")
                .about("Show or change settings")
                .arg(
                    Arg::new("interval")
                        .long("interval")
                        .value_name("MINUTES")
                        .help("Minutes between automatic backups; 0 disables them"),
                )
                .arg(
                    Arg::new("template")
                        .long("template")
                        .value_name("TEMPLATE")
                        .help("Commit message; {{date}} and {{numFiles}} are filled in"),
                )
                .arg(
                    Arg::new("date-format")
                        .long("date-format")
                        .value_name("FORMAT")
                        .help("strftime format used for {{date}}"),
                )
                .arg(
                    Arg::new("auto-push")
                        .long("auto-push")
                        .value_name("BOOL")
                        .value_parser(value_parser!(bool)),
                )
                .arg(
                    Arg::new("auto-pull-on-boot")
                        .long("auto-pull-on-boot")
                        .value_name("BOOL")
                        .value_parser(value_parser!(bool)),
                )
                .arg(
                    Arg::new("notifications")
                        .long("notifications")
                        .value_name("BOOL")
                        .value_parser(value_parser!(bool)),
                ),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();
    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(BackupSettings::default_path);
    let settings = BackupSettings::load(&config_path)?;

    if let Some(("config", sub)) = matches.subcommand() {
        return configure(sub, settings, &config_path);
    }

    let repo = matches
        .get_one::<PathBuf>("repo")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));
    let client = GitClient::open(&repo)?;
    let engine = BackupEngine::new(client, settings).with_settings_path(config_path);

    match matches.subcommand() {
        Some(("serve", _)) => serve(engine).await,
        Some(("backup", _)) => {
            engine.detect_repository().await?;
            let outcome = engine.commit_and_push().await;
            finish(&engine, outcome)
        }
        Some(("pull", _)) => {
            engine.detect_repository().await?;
            let outcome = engine.run_pull_cycle().await;
            finish(&engine, outcome)
        }
        Some(("status", sub)) => {
            engine.detect_repository().await?;
            let report = engine.status_report().await?;
            if sub.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Some(("branch", sub)) => {
            engine.detect_repository().await?;
            match sub.get_one::<String>("name") {
                Some(name) => {
                    engine.switch_branch(name).await?;
                    println!("{}", engine.indicator().text());
                }
                None => {
                    let branches = engine.list_branches().await?;
                    for branch in &branches.all {
                        let marker = if *branch == branches.current { '*' } else { ' ' };
                        println!("{marker} {branch}");
                    }
                }
            }
            Ok(())
        }
        _ => unreachable!("subcommand_required is set"),
    }
}

async fn serve(engine: BackupEngine<GitClient>) -> anyhow::Result<()> {
    let service = BackupService::new(engine);
    service.start().await?;
    tokio::signal::ctrl_c().await?;
    service.stop().await;
    Ok(())
}

fn finish(engine: &BackupEngine<GitClient>, outcome: CycleOutcome) -> anyhow::Result<()> {
    println!("{}", engine.indicator().text());
    match outcome {
        CycleOutcome::Failed(err) => Err(err.into()),
        CycleOutcome::Busy => bail!("another cycle is already running"),
        _ => Ok(()),
    }
}

fn print_report(report: &StatusReport) {
    let repo = &report.repository;
    println!("branch:      {}", repo.branch.as_deref().unwrap_or("-"));
    println!(
        "remote:      {} ({})",
        repo.remote.as_deref().unwrap_or("-"),
        repo.remote_url.as_deref().unwrap_or("no url")
    );
    match repo.last_sync {
        Some(at) => println!("last sync:   {}", time_since(at, chrono::Local::now())),
        None => println!("last sync:   never"),
    }
    println!("changes:     {}", report.pending.len());
    for change in &report.pending.changes {
        println!("  {:<9} {}", format!("{:?}", change.kind).to_lowercase(), change.path);
    }
}

fn configure(sub: &ArgMatches, mut settings: BackupSettings, path: &Path) -> anyhow::Result<()> {
    let mut changed = false;
    if let Some(input) = sub.get_one::<String>("interval") {
        settings.auto_save_interval = parse_interval(input)?;
        changed = true;
    }
    if let Some(template) = sub.get_one::<String>("template") {
        settings.commit_message = template.clone();
        changed = true;
    }
    if let Some(format) = sub.get_one::<String>("date-format") {
        validate_date_format(format)?;
        settings.commit_date_format = format.clone();
        changed = true;
    }
    if let Some(enabled) = sub.get_one::<bool>("auto-push") {
        settings.auto_push = *enabled;
        changed = true;
    }
    if let Some(enabled) = sub.get_one::<bool>("auto-pull-on-boot") {
        settings.auto_pull_on_boot = *enabled;
        changed = true;
    }
    if let Some(enabled) = sub.get_one::<bool>("notifications") {
        settings.disable_notifications = !*enabled;
        changed = true;
    }

    if changed {
        settings.save_to_path(path)?;
    }
    print!("{}", toml::to_string(&settings)?);
    Ok(())
}
