use std::io::Write;

use clap::Parser;
use docroute::{
    DataDir,
    FusedResult,
    LocalServices,
    Outcome,
    Router,
    chat::{ChatSession, ChatStep},
    collaborators::{CollectionInfo, IndexReport, PathOutcome},
    config::{KEYS, Settings},
    error::{self, Error},
    health::{HealthReport, Status},
    intent::{self, CollectionRequest},
    mcp,
    organizer::OrganizationPlan,
    router::process_paths,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{
    Cli,
    CollectionAction,
    Command,
    OrganizeAction,
    SettingsAction,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCROUTE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match &cli.command {
        Command::Classify(args) => {
            let intent = intent::classify_text(&args.text())?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&intent)?);
            } else {
                println!("{}", intent.kind());
            }
            return Ok(());
        }
        Command::Completions(args) => {
            args.generate();
            return Ok(());
        }
        _ => {}
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let mut services = LocalServices::open(data_dir)?;

    if let Command::Settings { action } = cli.command {
        return settings(&services, action);
    }
    if let Command::Chat(args) = &cli.command
        && let Some(strategy) = args.strategy
    {
        services.settings.strategy = strategy;
    }

    let router = services.router(process_paths()?)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(run(&services, router, cli.command))
}

async fn run(
    services: &LocalServices,
    router: Router,
    command: Command,
) -> error::Result<()> {
    match command {
        Command::Route(args) => {
            let routed = router.route(&args.text()).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&routed)?);
            } else {
                print_outcome(&routed.outcome);
            }
        }
        Command::Chat(args) => chat(&router, args.show_sources).await?,
        Command::Search(args) => {
            let top_k = args.count.unwrap_or(router.settings().top_k);
            let strategy =
                args.strategy.unwrap_or(router.settings().strategy);
            let results =
                router.search_with(&args.query, top_k, strategy).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if args.files {
                for r in &results {
                    println!("{}", r.document_id);
                }
            } else {
                print_results(&results);
            }
        }
        Command::Collection { action } => {
            let (request, json) = match action {
                CollectionAction::Create { name } => {
                    (CollectionRequest::Create { name }, false)
                }
                CollectionAction::List { json } => {
                    (CollectionRequest::List, json)
                }
                CollectionAction::Use { name } => {
                    (CollectionRequest::Switch { name }, false)
                }
                CollectionAction::Delete { name } => {
                    (CollectionRequest::Delete { name }, false)
                }
                CollectionAction::Info { name, json } => {
                    (CollectionRequest::Info { name }, json)
                }
            };
            let outcome = router.collection(&request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
        }
        Command::Index(args) => {
            let path = std::path::absolute(&args.path)?;
            let report =
                router.index_path(Some(path), args.recursive).await?;
            print_index_report(&report);
        }
        Command::Organize { action } => organize(&router, action).await?,
        Command::Health { json } => {
            let report = services.health(&router).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_health(&report);
            }
        }
        Command::Mcp => mcp::serve_stdio(router).await?,
        Command::Classify(_)
        | Command::Completions(_)
        | Command::Settings { .. } => {}
    }

    Ok(())
}

async fn chat(router: &Router, show_sources: bool) -> error::Result<()> {
    let mut session = ChatSession::new(show_sources);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!(
        "Answering from '{}'. Type 'exit' to leave, 'clear' to forget the \
         conversation, 'sources' to toggle source listings.",
        router.active_collection()
    );

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match session.step(router, &line).await {
            Ok(ChatStep::Exit) => break,
            Ok(ChatStep::Skipped) => {}
            Ok(ChatStep::Cleared) => println!("Conversation cleared."),
            Ok(ChatStep::SourcesShown(true)) => println!("Sources shown."),
            Ok(ChatStep::SourcesShown(false)) => println!("Sources hidden."),
            Ok(ChatStep::Routed(routed)) => match &routed.outcome {
                Outcome::Answer { text, .. } if !session.show_sources() => {
                    println!("{text}");
                }
                outcome => print_outcome(outcome),
            },
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}

async fn organize(
    router: &Router,
    action: OrganizeAction,
) -> error::Result<()> {
    let organizer = router.organizer();
    let collection = router.active_collection();
    match action {
        OrganizeAction::Propose {
            dir,
            mode,
            target,
            json,
        } => {
            let dir = std::path::absolute(&dir)?;
            let target = target.map(std::path::absolute).transpose()?;
            let plan = organizer
                .propose(&dir, mode, target.as_deref(), &collection)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_preview(&plan);
            }
        }
        OrganizeAction::Show { id: Some(id), json } => {
            let plan = organizer.show(&id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
            }
        }
        OrganizeAction::Show { id: None, json } => {
            let plans = organizer.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plans)?);
            } else if plans.is_empty() {
                println!("No organization plans stored.");
            } else {
                for plan in &plans {
                    println!(
                        "{}\t{}\t{} move(s)\t{}",
                        plan.id,
                        plan.state.as_str(),
                        plan.move_count(),
                        plan.source_dir.display()
                    );
                }
            }
        }
        OrganizeAction::Confirm { id } => {
            let report = router.confirm_organization(&id).await?;
            print_path_outcomes(&report.outcomes);
            if !report.all_succeeded() {
                eprintln!("Some moves failed; see above.");
            }
        }
    }
    Ok(())
}

fn settings(
    services: &LocalServices,
    action: SettingsAction,
) -> error::Result<()> {
    match action {
        SettingsAction::Show { json } => {
            let entries = services.settings.entries();
            if json {
                let map: serde_json::Map<String, serde_json::Value> = entries
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.into()))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                for (key, value) in entries {
                    println!("{key}\t{value}");
                }
            }
        }
        SettingsAction::Set { key, value } => {
            // Validate before persisting.
            Settings::default().set(&key, &value)?;
            services.config_db.set_setting(&key, value.trim())?;
            println!("Set {key} = {}", value.trim());
        }
        SettingsAction::Clear { key } => {
            if !KEYS.contains(&key.as_str()) {
                return Err(Error::Config(format!(
                    "unknown setting '{key}' (known: {})",
                    KEYS.join(", ")
                )));
            }
            if !services.config_db.remove_setting(&key)? {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key,
                });
            }
            println!("Cleared {key}");
        }
    }
    Ok(())
}

// -- Output --

fn print_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Reply { text } => println!("{text}"),
        Outcome::Answer { text, sources } => {
            println!("{text}");
            if !sources.is_empty() {
                println!();
                print_results(sources);
            }
        }
        Outcome::Filesystem { outcomes } => print_path_outcomes(outcomes),
        Outcome::OrganizationPreview { plan } => print_preview(plan),
        Outcome::Similar { results } => print_results(results),
        Outcome::CollectionCreated { collection } => {
            println!("Created collection '{}'", collection.name);
        }
        Outcome::Collections {
            collections,
            active,
        } => {
            for c in collections {
                let marker =
                    if c.name == active.as_str() { "*" } else { " " };
                println!("{marker} {}", describe_collection(c));
            }
        }
        Outcome::CollectionSwitched { previous, active } => {
            println!("Switched from '{previous}' to '{active}'");
        }
        Outcome::CollectionDeleted { name } => {
            println!("Deleted collection '{name}'");
        }
        Outcome::CollectionDetails { collection } => {
            println!("{}", describe_collection(collection));
        }
        Outcome::Indexed { report } => print_index_report(report),
    }
}

fn print_health(report: &HealthReport) {
    for c in &report.collaborators {
        let status = match c.status {
            Status::Ready => "ok",
            Status::Unavailable => "DOWN",
        };
        println!("{status:<6} {:<20} {}", c.collaborator.to_string(), c.detail);
    }

    println!();
    println!("Active collection: {}", report.active_collection);
    println!("Strategy: {}", report.strategy);
    println!("Degrade gracefully: {}", report.degrade_gracefully);
    for c in &report.collections {
        println!("  {}", describe_collection(c));
    }

    if let Some(storage) = &report.storage {
        println!();
        println!("Data directory: {}", storage.data_dir.display());
        println!("Disk usage: {} bytes", storage.disk_usage_bytes);
        println!("Stored plans: {}", storage.stored_plans);
    }

    if !report.can_answer() {
        println!(
            "\nContent questions will fail. Set degrade_gracefully or use \
             the pure_fulltext strategy."
        );
    }
}

fn describe_collection(c: &CollectionInfo) -> String {
    match c.document_count {
        Some(count) => format!("{}\t{count} document(s)", c.name),
        None => c.name.clone(),
    }
}

fn print_results(results: &[FusedResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    for r in results {
        println!("{:>3}. {:.4}  {}", r.rank, r.rrf_score, r.document_id);
    }
}

fn print_path_outcomes(outcomes: &[PathOutcome]) {
    for o in outcomes {
        let status = if o.success { "ok" } else { "FAILED" };
        println!("{status:<6} {}  {}", o.path.display(), o.detail);
    }
}

fn print_index_report(report: &IndexReport) {
    match report {
        IndexReport::Indexed {
            collection,
            path,
            documents,
        } => println!(
            "Indexed {documents} document(s) from {} into '{collection}'",
            path.display()
        ),
        IndexReport::NeedsClarification { question } => {
            println!("{question}");
        }
    }
}

fn print_preview(plan: &OrganizationPlan) {
    print_plan(plan);
    println!(
        "\nNothing has been moved. Run `docroute organize confirm {}` to \
         carry out this plan.",
        plan.id
    );
}

fn print_plan(plan: &OrganizationPlan) {
    println!(
        "Plan {} ({}, {} mode) for {}",
        plan.id,
        plan.state.as_str(),
        plan.mode,
        plan.source_dir.display()
    );
    for proposal in &plan.proposals {
        println!("\n{}", proposal.target_folder_path.display());
        for planned in &proposal.moves {
            let name = planned
                .from
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| planned.from.display().to_string());
            println!("  {name}");
        }
        if !proposal.confidence_basis.is_empty() {
            let basis: Vec<&str> = proposal
                .confidence_basis
                .iter()
                .take(3)
                .map(|hit| hit.document_id.file_name())
                .collect();
            println!("  similar to: {}", basis.join(", "));
        }
    }
}
