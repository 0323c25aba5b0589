//! One-shot setup tool for the USB configuration database
//!
//! Usage:
//!   usb-setup            apply migrations, then seed if Config is empty
//!   usb-setup migrate    apply pending migrations only
//!   usb-setup seed       apply migrations, then seed if Config is empty
//!   usb-setup reseed     apply migrations, then run the seed unconditionally
//!   usb-setup status     print migration status
//!   usb-setup validate   check that every seed row is present
//!
//! Connection settings come from the same environment as the server
//! (DATABASE_URL or DB_*, DB_SCHEMA, MIGRATIONS_DIR, SEED_FILE).

use std::env;

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use usb_configdb::config::Config;
use usb_configdb::pool::PoolManager;
use usb_configdb::schema::{MigrationRunner, SeedRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Setup,
    Migrate,
    Reseed,
    Status,
    Validate,
}

impl Command {
    fn parse(arg: Option<&str>) -> Option<Self> {
        match arg {
            None | Some("seed") => Some(Command::Setup),
            Some("migrate") => Some(Command::Migrate),
            Some("reseed") => Some(Command::Reseed),
            Some("status") => Some(Command::Status),
            Some("validate") => Some(Command::Validate),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(command) = Command::parse(args.get(1).map(String::as_str)) else {
        eprintln!("Usage: {} [migrate|seed|reseed|status|validate]", args[0]);
        std::process::exit(1);
    };

    let config = Config::from_env()?;
    let manager = PoolManager::new(&config).await?;

    let mut migrations = MigrationRunner::new();
    if let Some(dir) = &config.migrations_dir {
        migrations = migrations.with_directory(dir)?;
    }

    let seeder = match &config.seed_file {
        Some(path) => SeedRunner::from_file(path)?,
        None => SeedRunner::new(),
    };

    match command {
        Command::Status => {
            for status in migrations.status(&manager).await? {
                let state = match (status.applied, status.checksum_matches) {
                    (false, _) => "pending",
                    (true, true) => "applied",
                    (true, false) => "applied (checksum changed)",
                };
                println!("{:<48} {}", status.name, state);
            }
        }
        Command::Validate => {
            let report = seeder.validate_seed(&manager).await?;
            println!("{}/{} seed rows present", report.found, report.expected);
            for missing in &report.missing {
                println!("  missing: {}", missing);
            }
            if !report.is_complete() {
                std::process::exit(2);
            }
        }
        Command::Migrate | Command::Setup | Command::Reseed => {
            let applied = migrations.run_migrations(&manager).await?;
            info!("{} migrations applied to {}", applied, manager.database());

            if command != Command::Migrate {
                let result = if command == Command::Reseed {
                    seeder.run_seed(&manager).await?
                } else {
                    seeder.run_seed_if_empty(&manager).await?
                };

                if result.skipped {
                    info!("Config table already populated, seed skipped");
                } else {
                    info!(
                        "Seed complete: {} statements, {} rows",
                        result.statements_executed, result.rows_inserted
                    );
                }
            }
        }
    }

    manager.pool().close();
    Ok(())
}
