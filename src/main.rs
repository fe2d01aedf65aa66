//! Command line entry point. The pipeline stages live in the library
//! crate; this handles the CLI, the config file and the progress banners.

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command};
use color_eyre::eyre::{eyre, Result};
use human_bytes::human_bytes;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ensembler::config::Config;
use ensembler::create::run_create;
use ensembler::handle::{read_manifest, ImasHandle};
use ensembler::merge::run_merge;
use ensembler::storage::StoreKind;
use ensembler::variables::{VarLookup, VariableResolver};

/// Program entry point. Handles the CLI.
fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ensembler=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Command::new("ensembler")
        .about("Uncertainty quantification pipelines over IMAS-style data entries")
        .arg_required_else_help(true)
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .default_value("ensembler.yaml")
                .help("Path to a configuration file (YAML)"),
        )
        .subcommand(Command::new("new").about("Create a new template config file"))
        .subcommand(
            Command::new("create")
                .about("Expand the sweep and write one data entry per sample")
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite existing target entries"),
                ),
        )
        .subcommand(
            Command::new("merge")
                .about("Merge the created runs into one entry with error bounds"),
        )
        .subcommand(
            Command::new("variables")
                .about("Resolve the variables listing against a data entry")
                .arg(
                    Arg::new("handle")
                        .required(true)
                        .help("Data entry handle, user/db/shot/run (user optional)"),
                ),
        )
        .get_matches();

    println!("------------------------- ensembler -------------------------");
    let config_path = PathBuf::from(cli.get_one::<String>("config").expect("config has a default"));

    // Handle the new subcommand before trying to load anything
    if let Some(("new", _)) = cli.subcommand() {
        println!(
            "Making a template configuration file at {}...",
            config_path.display()
        );
        Config::default().save(&config_path)?;
        println!("Done.");
        println!("-------------------------------------------------------------");
        return Ok(());
    }

    let config = Config::load(&config_path)?;
    println!(
        "Successfully loaded configuration from {}",
        config_path.display()
    );

    if config.store == StoreKind::Hdf5 && !config.imasdb.exists() {
        println!(
            "Data store root {} does not exist! Quitting.",
            config.imasdb.display()
        );
        println!("-------------------------------------------------------------");
        return Ok(());
    }

    match cli.subcommand() {
        Some(("create", sub)) => {
            let create = config
                .create
                .as_ref()
                .ok_or_else(|| eyre!("the config has no create section"))?;
            let store = config.open_store();
            println!(
                "Expanding a sweep of {} dimensions...",
                create.dimensions.len()
            );
            let records = run_create(
                store.as_ref(),
                create,
                &config.runs_file,
                sub.get_flag("force"),
            )?;
            println!(
                "Created {} run entries, manifest at {}.",
                records.len(),
                config.runs_file.display()
            );
        }
        Some(("merge", _)) => {
            let merge = config
                .merge
                .as_ref()
                .ok_or_else(|| eyre!("the config has no merge section"))?;
            let store = config.open_store();
            let runs = read_manifest(&config.runs_file)?;
            let mut plan_ids: Vec<&str> = Vec::new();
            for step in &merge.plan {
                if !plan_ids.contains(&step.ids.as_str()) {
                    plan_ids.push(&step.ids);
                }
            }
            let total: u64 = runs
                .iter()
                .map(|run| {
                    plan_ids
                        .iter()
                        .map(|ids| store.data_size(&run.handle, ids))
                        .sum::<u64>()
                })
                .sum();
            println!(
                "Total amount of data to be merged: {}",
                human_bytes(total as f64)
            );
            println!("Merging...");
            run_merge(store.as_ref(), merge, &runs)?;
            println!("Merged {} runs into {}.", runs.len(), merge.output);
        }
        Some(("variables", sub)) => {
            let listing = config
                .variables
                .as_ref()
                .ok_or_else(|| eyre!("the config has no variables listing"))?;
            let lookup = VarLookup::load(listing)?;
            let handle: ImasHandle = sub
                .get_one::<String>("handle")
                .expect("handle is required")
                .parse()?;
            let store = config.open_store();
            let mut resolver = VariableResolver::new(store.as_ref(), &handle, &lookup);
            println!("Resolving {} variables against {}...", lookup.len(), handle);
            for name in lookup.names() {
                match resolver.resolve(name) {
                    Ok(value) => println!("  {name} = {value}"),
                    Err(err) => println!("  {name}: unresolved ({err})"),
                }
            }
        }
        _ => {}
    }

    println!("-------------------------------------------------------------");
    Ok(())
}
