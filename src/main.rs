use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kubeplan::cli::{self, Cli, Commands, Environment, ImageAction};
use kubeplan::clock::Clock;
use kubeplan::config::load_config;
use kubeplan::monitor::{self, spawn_monitor};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file: explicit path must exist, ./.env is optional
    match cli.env_file {
        Some(ref env_file) => {
            if let Err(e) = dotenvy::from_path(env_file) {
                error!("Failed to load env file {}: {}", env_file.display(), e);
                process::exit(1);
            }
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref()).context("loading config")?;

    match cli.command {
        Commands::Plan(args) => {
            let env = Environment::build(config, true)?;
            let loaded = cli::load_request(&args.file)?;
            let spec = cli::plan(&env.provisioner, &loaded)?;
            match cli::format_structured(&spec, args.output) {
                Some(out) => println!("{}", out),
                None => print!("{}", cli::format_spec(&spec)),
            }
        }

        Commands::Render(args) => {
            let env = Environment::build(config, true)?;
            let loaded = cli::load_request(&args.file)?;
            let (spec, package) = cli::render(&env.provisioner, &loaded)?;
            match args.bundle {
                Some(dir) => {
                    let bundle = cli::write_bundle(&spec, &package, &dir)?;
                    println!("Wrote {} files to {}", bundle.files.len(), dir.display());
                    print!("{}", cli::format_package(&package));
                }
                None => print!("{}", package.to_stream()),
            }
        }

        Commands::Cost(args) => {
            let env = Environment::build(config, true)?;
            let loaded = cli::load_request(&args.file)?;
            let spec = cli::plan(&env.provisioner, &loaded)?;
            print!("{}", cli::format_costs(&cli::cost(&spec)));
        }

        Commands::Advise(args) => {
            let env = Environment::build(config, true)?;
            let loaded = cli::load_request(&args.file)?;
            let spec = cli::plan(&env.provisioner, &loaded)?;
            let report = cli::advise(&spec, &args.inventory, env.clock.now())?;
            match cli::format_structured(&report, args.output) {
                Some(out) => println!("{}", out),
                None => print!("{}", cli::format_placement(&report)),
            }
        }

        Commands::Apply(args) => {
            let env = Environment::build(config, args.dry_run)?;
            let loaded = cli::load_request(&args.file)?;
            let spec = cli::apply(&env.provisioner, &loaded).await?;
            if env.dry_run {
                println!("(dry run, nothing was applied)");
            }
            println!(
                "Tenant {} provisioned in namespace {} ({} components)",
                spec.tenant_id,
                spec.namespace,
                spec.components.len()
            );
        }

        Commands::Status(args) => {
            let env = Environment::build(config, false)?;
            let report = cli::status(&env.provisioner, &args.tenant).await?;
            match cli::format_structured(&report, args.output) {
                Some(out) => println!("{}", out),
                None => print!("{}", cli::format_tenant_status(&report)),
            }
        }

        Commands::Delete(args) => {
            let env = Environment::build(config, false)?;
            if cli::delete(&env.provisioner, &args.tenant).await? {
                println!("Tenant {} deleted", args.tenant);
            } else {
                println!("Tenant {} not found", args.tenant);
            }
        }

        Commands::Monitor(args) => {
            let env = Environment::build(config, false)?;
            let monitor = Arc::new(env.monitor(args.auto_rollback));

            if args.once {
                monitor.run_cycle().await;
                print!("{}", cli::format_health(&monitor.health_summary().await));
                return Ok(());
            }

            let addr: SocketAddr = format!("{}:{}", args.bind_addr, args.port)
                .parse()
                .with_context(|| format!("invalid bind address {}:{}", args.bind_addr, args.port))?;

            let cancel = CancellationToken::new();
            let job = spawn_monitor(monitor.clone(), cancel.clone());
            let server = tokio::spawn(monitor::http::serve(addr, monitor, cancel.clone()));

            info!("Endpoints:");
            info!("  GET  /health                - Liveness");
            info!("  GET  /v1/health             - Health summary");
            info!("  GET  /v1/health/{{namespace}} - Deployments of one namespace");
            info!("  GET  /v1/rollbacks          - Rollbacks in progress");

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("Shutting down monitor");
            cancel.cancel();
            job.stop().await;
            server.await?.context("health endpoint")?;
        }

        Commands::Image(args) => {
            let ledger = &cli::open_ledger(&config)?;
            match args.action {
                ImageAction::Record {
                    service,
                    image,
                    status,
                    commit,
                } => {
                    let recorded = cli::image_record(ledger, &service, &image, &status, commit).await?;
                    println!(
                        "Recorded {}:{} as {}",
                        recorded.service, recorded.version, recorded.status
                    );
                }
                ImageAction::Promote {
                    service,
                    version,
                    status,
                    new_cycle,
                } => {
                    let image = cli::image_promote(ledger, &service, &version, &status, new_cycle).await?;
                    println!("{}:{} is now {}", image.service, image.version, image.status);
                }
                ImageAction::List { service, limit } => {
                    if limit == 0 {
                        bail!("--limit must be at least 1");
                    }
                    let images = cli::image_list(ledger, &service, limit).await?;
                    print!("{}", cli::format_images(&images));
                }
            }
        }

        Commands::History(args) => {
            let ledger = cli::open_ledger(&config)?;
            let records = cli::history(&ledger, &args.tenant, args.service.as_deref()).await?;
            print!("{}", cli::format_history(&records));
        }
    }

    Ok(())
}
