use anyhow::{anyhow, bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use mergin_api::{ListFlag, ProjectId, SyncConfig, SyncEvent};
use mergin_sync::{ModelKind, ProjectsModel, SyncSession};
use std::path::PathBuf;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("mergin-sync")
        .version(mergin_sync::VERSION)
        .about("Synchronize Mergin projects with a local data directory")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .default_value("mergin.toml")
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Directory holding the local projects"),
        )
        .arg(
            Arg::new("api-root")
                .long("api-root")
                .global(true)
                .help("Server URL"),
        )
        .subcommand(
            Command::new("login")
                .about("Log in and store the session")
                .arg(Arg::new("username").required(true))
                .arg(
                    Arg::new("password")
                        .long("password")
                        .env("MERGIN_PASSWORD")
                        .required(true)
                        .help("Password (or MERGIN_PASSWORD)"),
                ),
        )
        .subcommand(Command::new("logout").about("Forget the stored session"))
        .subcommand(Command::new("ping").about("Check the server version"))
        .subcommand(
            Command::new("list")
                .about("List server projects")
                .arg(
                    Arg::new("created")
                        .long("created")
                        .action(ArgAction::SetTrue)
                        .conflicts_with("shared")
                        .help("Only projects created by you"),
                )
                .arg(
                    Arg::new("shared")
                        .long("shared")
                        .action(ArgAction::SetTrue)
                        .help("Only projects shared with you"),
                )
                .arg(Arg::new("search").long("search").default_value(""))
                .arg(
                    Arg::new("page")
                        .long("page")
                        .default_value("1")
                        .value_parser(value_parser!(u32)),
                ),
        )
        .subcommand(
            Command::new("download")
                .about("Download a project into the data directory")
                .arg(Arg::new("project").required(true).help("namespace/name")),
        )
        .subcommand(
            Command::new("sync")
                .about("Update or upload a local project as its status requires")
                .arg(Arg::new("project").required(true).help("namespace/name")),
        )
        .subcommand(Command::new("status").about("Show the status of local projects"))
}

fn load_config(matches: &ArgMatches) -> Result<SyncConfig> {
    let path = matches
        .get_one::<PathBuf>("config")
        .context("missing --config")?;
    let mut config = SyncConfig::load(path)?;
    if let Some(dir) = matches.get_one::<PathBuf>("data-dir") {
        config = config.with_data_dir(dir.clone());
    }
    if let Some(root) = matches.get_one::<String>("api-root") {
        config = config.with_api_root(root.clone());
    }
    config.validate()?;
    Ok(config)
}

/// Wait until `pick` turns an event into an outcome
async fn wait_for<T>(
    events: &mut broadcast::Receiver<SyncEvent>,
    mut pick: impl FnMut(&SyncEvent) -> Option<Result<T>>,
) -> Result<T> {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(error) = failure(&event) {
                    return Err(error);
                }
                if let SyncEvent::Notify { message } = &event {
                    println!("{message}");
                }
                if let Some(outcome) = pick(&event) {
                    return outcome;
                }
            }
            Err(RecvError::Lagged(missed)) => tracing::warn!("missed {} events", missed),
            Err(RecvError::Closed) => bail!("event bus closed"),
        }
    }
}

fn failure(event: &SyncEvent) -> Option<anyhow::Error> {
    match event {
        SyncEvent::NetworkErrorOccurred { message, detail }
        | SyncEvent::ApiIncompatibilityOccurred { message, detail } => {
            Some(if detail.is_empty() {
                anyhow!("{message}")
            } else {
                anyhow!("{message} ({detail})")
            })
        }
        SyncEvent::AuthFailed => Some(anyhow!("authentication failed")),
        SyncEvent::AuthRequested => Some(anyhow!("not logged in, run `mergin-sync login` first")),
        _ => None,
    }
}

async fn refreshed_local_model(session: &SyncSession) -> Result<ProjectsModel> {
    let mut events = session.subscribe();
    let mut model = ProjectsModel::new(ModelKind::Local, session.clone());
    let Some(request) = model.list_projects("", 1) else {
        return Ok(model);
    };
    let listing = wait_for(&mut events, |event| match event {
        SyncEvent::ListProjectsFinished { request_id, .. } if *request_id == request => {
            Some(Ok(event.clone()))
        }
        SyncEvent::ListProjectsFailed { request_id, .. } if *request_id == request => {
            Some(Err(anyhow!("listing failed")))
        }
        _ => None,
    })
    .await?;
    model.handle_event(&listing);
    Ok(model)
}

async fn run_transfer(
    session: &SyncSession,
    events: &mut broadcast::Receiver<SyncEvent>,
    request: mergin_api::RequestId,
) -> Result<()> {
    wait_for(events, |event| match event {
        SyncEvent::SyncProjectStatusChanged { project, progress } if *progress >= 0.0 => {
            tracing::debug!("{}: {:.0}%", project, progress * 100.0);
            None
        }
        SyncEvent::SyncProjectFinished {
            request_id,
            project,
            project_dir,
            success,
        } if *request_id == request => Some(if *success {
            println!("{} synced into {}", project, project_dir.display());
            Ok(())
        } else {
            Err(anyhow!("sync of {project} failed"))
        }),
        _ => None,
    })
    .await?;
    tracing::debug!("{} transfers still pending", session.pending().len());
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    let session = SyncSession::with_http(config);
    let mut events = session.subscribe();

    match matches.subcommand() {
        Some(("login", args)) => {
            let username = args.get_one::<String>("username").context("missing username")?;
            let password = args.get_one::<String>("password").context("missing password")?;
            session.authorize(username, password);
            wait_for(&mut events, |event| {
                matches!(event, SyncEvent::AuthChanged).then_some(Ok(()))
            })
            .await?;
            println!("logged in as {username}");
        }
        Some(("logout", _)) => {
            session.clear_auth();
            println!("logged out");
        }
        Some(("ping", _)) => {
            session.ping_server();
            let (version, message) = wait_for(&mut events, |event| match event {
                SyncEvent::PingFinished { version, message } => {
                    Some(Ok((version.clone(), message.clone())))
                }
                _ => None,
            })
            .await?;
            println!("{} runs {}", session.api_root(), version);
            if !message.is_empty() {
                bail!(message);
            }
        }
        Some(("list", args)) => {
            let flag = if args.get_flag("created") {
                Some(ListFlag::Created)
            } else if args.get_flag("shared") {
                Some(ListFlag::Shared)
            } else {
                None
            };
            let search = args.get_one::<String>("search").map_or("", String::as_str);
            let page = args.get_one::<u32>("page").copied().unwrap_or(1);
            let request = session.list_projects(session.list_query(flag, search, page));
            let (projects, count) = wait_for(&mut events, |event| match event {
                SyncEvent::ListProjectsFinished {
                    request_id,
                    projects,
                    count,
                    ..
                } if *request_id == request => Some(Ok((projects.clone(), *count))),
                SyncEvent::ListProjectsFailed { request_id, .. } if *request_id == request => {
                    Some(Err(anyhow!("listing failed")))
                }
                _ => None,
            })
            .await?;
            for project in &projects {
                println!(
                    "{:<40} {:>8} {:>6} files {:>12} bytes",
                    project.id().to_string(),
                    project.version.as_deref().unwrap_or("-"),
                    project.files_count,
                    project.size
                );
            }
            println!("page {page}: {} of {count} projects", projects.len());
        }
        Some(("download", args)) => {
            let project: ProjectId = args
                .get_one::<String>("project")
                .context("missing project")?
                .parse()?;
            let request = session.download_project(&project)?;
            run_transfer(&session, &mut events, request).await?;
        }
        Some(("sync", args)) => {
            let id = args.get_one::<String>("project").context("missing project")?;
            let model = refreshed_local_model(&session).await?;
            let entry = model
                .project_from_id(id)
                .with_context(|| format!("no local project {id}"))?;
            println!("{}: {:?}", entry.id(), entry.status());
            match model.sync_project(id)? {
                Some(request) => run_transfer(&session, &mut events, request).await?,
                None => println!("nothing to do"),
            }
        }
        Some(("status", _)) => {
            let model = refreshed_local_model(&session).await?;
            if model.is_empty() {
                println!("no projects in {}", session.config().data_dir.display());
            }
            for entry in model.entries() {
                let location = entry
                    .local
                    .as_ref()
                    .map(|l| l.path.display().to_string())
                    .unwrap_or_default();
                println!("{:<40} {:<12} {}", entry.id(), format!("{:?}", entry.status()), location);
            }
        }
        _ => bail!("no command given"),
    }
    Ok(())
}
