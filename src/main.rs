use clap::{Args, Parser, Subcommand};
use derive_more::{Display, Error};
use docmirror_codec::Value;
use docmirror_config::Config;
use docmirror_gateway::backend::LocalGateway;
use docmirror_gateway::{SearchQuery, url};
use docmirror_store::{FetchOptions, File, NewFile, Store};
use exn::{OptionExt, ResultExt};
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("unable to load configuration")]
    Config,
    #[display("unable to open the local gateway")]
    Gateway,
    #[display("no main repository configured; pass --main or set `main`")]
    NoMain,
    #[display("main repository `{_0}` is unavailable")]
    MainUnavailable(#[error(not(source))] String),
    #[display("expected `owner/name`, got `{_0}`")]
    FullName(#[error(not(source))] String),
    #[display("{_0} failed")]
    Command(#[error(not(source))] &'static str),
}

#[derive(Debug, Parser)]
#[command(about, version)]
struct Cli {
    /// Configuration file, instead of the platform default locations.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Main repository (`owner/name`), overriding the configuration.
    #[arg(short, long, global = true)]
    main: Option<String>,
    /// Log debug output.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register a repository with the local gateway.
    Init(InitOptions),
    /// List repositories tagged with the configured topics.
    Repos,
    /// Show unsaved changes, configuration problems and build status.
    Status,
    /// Fetch the files of another repository.
    Fetch { repository: String },
    /// Install a file from another repository into the main one.
    Install { url: String },
    /// Retry copying the outstanding dependencies of an installed file.
    RetryDeps { url: String },
    /// Delete a file of the main repository.
    Delete {
        url: String,
        /// Leave installed assets in place.
        #[arg(long)]
        keep_dependencies: bool,
    },
    /// Copy a file next to itself.
    Duplicate { url: String },
    /// Renumber the episodes of a day.
    Compact {
        day: String,
        /// Episodes to leave untouched.
        #[arg(long)]
        ignore: Vec<String>,
    },
    /// Push every changed file of the main repository.
    Save,
    /// Replace the topics of the main repository.
    Topics { topics: Vec<String> },
}

#[derive(Debug, Args)]
struct InitOptions {
    /// Repository to create (`owner/name`).
    repository: String,
    #[arg(long)]
    topic: Vec<String>,
    /// Mark the repository as a template.
    #[arg(long)]
    template: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().compact().with_target(false))
        .with(filter)
        .init();

    if let Err(err) = run(cli).await {
        tracing::error!("{err:?}");
        exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let root = config.gateway_root().or_raise(|| ErrorKind::Config)?;
    let gateway = Arc::new(
        LocalGateway::new("local", root, &config.gateway.api_base, &config.gateway.login)
            .or_raise(|| ErrorKind::Gateway)?,
    );

    if let Command::Init(options) = &cli.command {
        let (owner, name) = split_full_name(&options.repository)?;
        let repository = gateway
            .register(owner, name, &options.topic, options.template)
            .await
            .or_raise(|| ErrorKind::Command("init"))?;
        println!("{}", repository.url);
        return Ok(());
    }

    let main_url = match &cli.main {
        Some(full_name) => {
            split_full_name(full_name)?;
            url::repository_url(&config.gateway.api_base, full_name)
        },
        None => config.main.clone().ok_or_raise(|| ErrorKind::NoMain)?,
    };
    let store = Store::new(gateway, config);
    open_main(&store, &main_url).await?;

    match cli.command {
        Command::Init(_) => {},
        Command::Repos => {
            let query = SearchQuery::topics(store.config().repository.topics.clone());
            for view in store.find_repositories(&query).await.or_raise(|| ErrorKind::Command("repos"))?.unwrap_or_default() {
                println!("{}\t{}", view.repository.full_name(), view.repository.topics.join(","));
            }
        },
        Command::Status => status(&store).await?,
        Command::Fetch { repository } => {
            split_full_name(&repository)?;
            let url = url::repository_url(&store.config().gateway.api_base, &repository);
            if store.repository(Some(url.as_str())).or_raise(|| ErrorKind::Command("fetch"))?.is_none() {
                let remote = store.gateway().fetch_repository(&url).await.or_raise(|| ErrorKind::Command("fetch"))?;
                store.add_repository(remote.into()).or_raise(|| ErrorKind::Command("fetch"))?;
            }
            let view = store
                .find_repository_files(&url, FetchOptions::default())
                .await
                .or_raise(|| ErrorKind::Command("fetch"))?;
            for file in view.map(|v| v.files).unwrap_or_default() {
                println!("{}", file.url);
            }
        },
        Command::Install { url } => {
            if store.file(&url).is_none()
                && let Some(remote) = store.pull_url(&url).await.or_raise(|| ErrorKind::Command("install"))?
            {
                store.add_file(NewFile::from(remote), true).or_raise(|| ErrorKind::Command("install"))?;
            }
            match store.install(&url).await.or_raise(|| ErrorKind::Command("install"))? {
                Some(file) => print_dependencies(&file),
                None => report_failure(&store, "install"),
            }
        },
        Command::RetryDeps { url } => {
            let Some(file) = store.install_dependencies(&url).await.or_raise(|| ErrorKind::Command("retry-deps"))? else {
                report_failure(&store, "retry-deps");
                return Ok(());
            };
            if store.push_file(&file.url).await.or_raise(|| ErrorKind::Command("retry-deps"))?.is_none() {
                report_failure(&store, "retry-deps");
            }
            print_dependencies(&file);
        },
        Command::Delete { url, keep_dependencies } => {
            match store.delete_file(&url, !keep_dependencies).await.or_raise(|| ErrorKind::Command("delete"))? {
                Some(tally) => {
                    tally.deleted.iter().for_each(|d| println!("deleted\t{d}"));
                    tally.skipped.iter().for_each(|s| println!("kept\t{s}"));
                    tally.failed.iter().for_each(|f| println!("failed\t{f}"));
                },
                None => report_failure(&store, "delete"),
            }
        },
        Command::Duplicate { url } => {
            let copy = store.duplicate_file(&url).or_raise(|| ErrorKind::Command("duplicate"))?;
            match store.push_file(&copy.url).await.or_raise(|| ErrorKind::Command("duplicate"))? {
                Some(pushed) => println!("{}", pushed.url),
                None => report_failure(&store, "duplicate"),
            }
        },
        Command::Compact { day, ignore } => {
            let day = serde_yaml::from_str::<Value>(&day).unwrap_or(Value::String(day));
            let updated = store.rewrite_episode_orders(&day, &ignore).or_raise(|| ErrorKind::Command("compact"))?;
            tracing::info!(episodes = updated.len(), "renumbered episodes");
            save(&store).await?;
        },
        Command::Save => save(&store).await?,
        Command::Topics { topics } => {
            match store.set_topics(&topics).await.or_raise(|| ErrorKind::Command("topics"))? {
                Some(repository) => println!("{}", repository.topics.join(",")),
                None => report_failure(&store, "topics"),
            }
        },
    }
    Ok(())
}

async fn open_main(store: &Store, main_url: &str) -> Result<()> {
    let loaded = store.load_repository(main_url).await.or_raise(|| ErrorKind::MainUnavailable(main_url.to_string()))?;
    if loaded.is_none() {
        exn::bail!(ErrorKind::MainUnavailable(main_url.to_string()));
    }
    store
        .find_repository_files(main_url, FetchOptions::default())
        .await
        .or_raise(|| ErrorKind::MainUnavailable(main_url.to_string()))?;
    Ok(())
}

async fn status(store: &Store) -> Result<()> {
    let view = store
        .repository(None)
        .or_raise(|| ErrorKind::Command("status"))?
        .ok_or_raise(|| ErrorKind::NoMain)?;
    println!("{} ({})", view.repository.full_name(), view.repository.topics.join(","));
    for episode in &view.episodes {
        let order = episode.front_matter.order_key();
        println!("  {order:>10}  {}", episode.path);
    }
    if let Some(config) = &view.config {
        for (field, problem) in store.config_errors(&config.url).or_raise(|| ErrorKind::Command("status"))? {
            println!("config: {field} {problem}");
        }
    }
    let build = store.build_status().await.or_raise(|| ErrorKind::Command("status"))?;
    println!("build: {build:?}");
    Ok(())
}

async fn save(store: &Store) -> Result<()> {
    let summary = store.save_repository_changes().await.or_raise(|| ErrorKind::Command("save"))?;
    summary.successes.iter().for_each(|saved| println!("saved\t{saved}"));
    summary.failures.iter().for_each(|failed| println!("failed\t{failed}"));
    Ok(())
}

fn print_dependencies(file: &File) {
    println!("{}", file.url);
    file.front_matter.dependencies().iter().for_each(|d| println!("  installed\t{d}"));
    file.front_matter.missing_dependencies().iter().for_each(|d| println!("  missing\t{d}"));
}

fn report_failure(store: &Store, command: &str) {
    match store.last_error() {
        Some(record) => println!("{command}: {record}"),
        None => println!("{command}: busy, nothing done"),
    }
}

fn split_full_name(full_name: &str) -> Result<(&str, &str)> {
    match full_name.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => Ok((owner, name)),
        _ => exn::bail!(ErrorKind::FullName(full_name.to_string())),
    }
}
