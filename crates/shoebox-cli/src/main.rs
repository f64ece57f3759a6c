mod commands;
mod logging;
mod progress;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context};
use chrono::NaiveDateTime;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, CommitArgs, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use shoebox_core::config::load_configuration;
use shoebox_core::{
    AppConfig, CancellationToken, CommandExtractor, CommitOptions, ContentSimilarity,
    FilesystemExtractor, Granularity, ImportBatch, IntegrityIssue, Library, MatchType,
    MetadataExtractor, StagingOptions,
};
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();
    let root = args
        .library
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.library_root));

    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return Ok(());
    };

    if let Err(err) = run(command, &root, &config) {
        error!("Error: {:#}", err);
        process::exit(1);
    }
    Ok(())
}

fn run(command: Commands, root: &Path, config: &AppConfig) -> anyhow::Result<()> {
    match command {
        Commands::Init => {
            Library::create(root, config.library.clone())?;
            println!("Initialised library at {}", root.display().to_string().green());
        }
        Commands::PrintConfig => {
            println!("Configuration: {:?}", config);
        }
        command => {
            let library = Library::open(root, config.library.clone())
                .with_context(|| format!("opening library at {}", root.display()))?;
            run_with_library(command, &library, config)?;
        }
    }
    Ok(())
}

fn run_with_library(command: Commands, library: &Library, config: &AppConfig) -> anyhow::Result<()> {
    let reporter = CliReporter::new();
    match command {
        Commands::Stage {
            folder,
            recompute,
            extensions,
        } => {
            let batch = library.create_import_batch(&folder)?;
            let options = StagingOptions {
                allowed_extensions: (!extensions.is_empty()).then_some(extensions),
                recompute,
            };
            stage(library, &batch, &options, config, &reporter)?;
        }
        Commands::Match { batch } => {
            let batch = library.import_batch(batch)?;
            let report = library.match_batch(&batch, &reporter)?;
            for match_type in MatchType::ALL {
                let count = report.count(match_type);
                if count > 0 {
                    info!("{:<22} {}", match_type.label(), count.to_string().cyan());
                }
            }
            if report.failed > 0 {
                warn!("{} rows could not be matched", report.failed.to_string().red());
            }
        }
        Commands::Commit { batch, commit } => {
            let batch = library.import_batch(batch)?;
            let options = commit_options(library, &commit)?;
            let report = library.import_folder(&batch, &options, &reporter)?;
            info!(
                "{} imported, {} failed, {} provenance copies",
                report.imported.to_string().green(),
                report.failed.to_string().red(),
                report.provenance_copied
            );
        }
        Commands::Import { folder, commit } => {
            let options = commit_options(library, &commit)?;
            let batch = library.create_import_batch(&folder)?;
            let staged = stage(library, &batch, &StagingOptions::default(), config, &reporter)?;
            let matched = library.match_batch(&batch, &reporter)?;
            let report = library.import_folder(&batch, &options, &reporter)?;
            info!(
                "{} imported, {} already in library",
                report.imported.to_string().green(),
                (matched.counts.values().sum::<usize>() - matched.count(MatchType::NoMatch))
                    .to_string()
                    .yellow()
            );
            if staged + matched.failed + report.failed == 0 {
                library.finish_import_batch(&batch)?;
            } else {
                warn!(
                    "Batch {} kept open: some files failed; inspect with `shoebox staged {}`",
                    batch.key, batch.key
                );
            }
        }
        Commands::Batches => {
            for batch in library.import_batches()? {
                println!(
                    "{:>5}  {}  {}",
                    batch.key.to_string().cyan(),
                    batch.created_at,
                    batch.root_path
                );
            }
        }
        Commands::Staged { batch } => {
            let batch = library.import_batch(batch)?;
            for row in library.staged_files(&batch)? {
                let status = match (row.imported, row.match_type) {
                    (true, _) => format!("imported as {}", row.import_key.unwrap_or_default())
                        .green()
                        .to_string(),
                    (false, Some(m)) => m.label().yellow().to_string(),
                    (false, None) if !row.allowed => "not allowed".dimmed().to_string(),
                    (false, None) => "pending".to_string(),
                };
                println!(
                    "{:>5}  {:<24} {}  {}",
                    row.key,
                    status,
                    row.source_path().display(),
                    row.message.unwrap_or_default().dimmed()
                );
            }
        }
        Commands::Revert { batch } => {
            let batch = library.import_batch(batch)?;
            library.revert_import_batch(&batch)?;
            println!("Reverted batch {}", batch.key);
        }
        Commands::Finish { batch } => {
            let batch = library.import_batch(batch)?;
            library.finish_import_batch(&batch)?;
            println!("Finished batch {}", batch.key);
        }
        Commands::FindDuplicates {
            hash,
            granularity,
            background,
        } => {
            let stored = if hash {
                library.find_hash_duplicates()?
            } else {
                let granularity = Granularity::parse(&granularity)
                    .ok_or_else(|| anyhow!("unknown granularity '{}'", granularity))?;
                find_similar(library, granularity, background)?
            };
            info!("{} duplicate clusters registered", stored.to_string().red());
        }
        Commands::Duplicates => {
            for cluster in library.duplicate_clusters()? {
                let keys: Vec<String> = cluster.matched_keys.iter().map(|k| k.to_string()).collect();
                println!(
                    "{:>5}  {:<8} {}",
                    cluster.key.to_string().cyan(),
                    cluster.match_type,
                    keys.join(", ")
                );
            }
        }
        Commands::ClearDuplicates => {
            if prompt_confirm("Discard every pending duplicate cluster?", Some(false))? {
                library.clear_duplicates()?;
            }
        }
        Commands::Resolve {
            cluster,
            successor,
            delete,
        } => {
            let merged = library.resolve_cluster(cluster, successor, delete)?;
            println!("Merged {} entries into {}", merged, successor);
        }
        Commands::Merge {
            successor,
            duplicate,
            delete,
        } => {
            library.mark_duplicate(successor, duplicate, delete)?;
            println!("Merged {} into {}", duplicate, successor);
        }
        Commands::Trash { key } => library.trash_entry(key)?,
        Commands::Restore { key } => library.restore_entry(key)?,
        Commands::Path { key } => match library.entry_path(key)? {
            Some(path) => println!("{}", path.display()),
            None => bail!("entry {} has no file on disk", key),
        },
        Commands::Rename {
            key,
            timestamp,
            tag,
        } => {
            let datetime = parse_timestamp(&timestamp)?;
            let name = library.rename_entry(key, datetime, &tag)?;
            println!("{}", name);
        }
        Commands::ReleaseName { name } => {
            if !library.release_name(&name)? {
                warn!("'{}' was not reserved", name);
            }
        }
        Commands::Stats => {
            let stats = library.stats()?;
            println!("active         {}", stats.active.to_string().green());
            println!("trashed        {}", stats.soft_deleted);
            println!("deleted        {}", stats.hard_deleted);
            println!("anomalous      {}", stats.anomalous.to_string().red());
            println!("replaced       {}", stats.replaced);
            println!("names          {}", stats.reserved_names);
            println!("clusters       {}", stats.pending_clusters);
            println!("open batches   {}", stats.open_batches);
        }
        Commands::Check => {
            let issues = library.check_integrity()?;
            for issue in &issues {
                match issue {
                    IntegrityIssue::MissingFile { key, expected } => {
                        println!("{:>5}  missing {}", key, expected.display().to_string().red())
                    }
                    IntegrityIssue::UnexpectedFile { key, found } => {
                        println!("{:>5}  leftover {}", key, found.display().to_string().yellow())
                    }
                    IntegrityIssue::AnomalousState { key } => {
                        println!("{:>5}  neither present nor trashed", key)
                    }
                }
            }
            if issues.is_empty() {
                println!("{}", "Catalog matches the filesystem".green());
            }
        }
        Commands::FlattenChains => {
            let fixed = library.flatten_replaced_chains()?;
            println!("Repointed {} replaced entries", fixed);
        }
        Commands::Init | Commands::PrintConfig => {}
    }
    Ok(())
}

fn extractor(config: &AppConfig) -> Box<dyn MetadataExtractor> {
    match config
        .metadata_command
        .as_deref()
        .and_then(CommandExtractor::from_argv)
    {
        Some(command) => Box::new(command),
        None => Box::new(FilesystemExtractor),
    }
}

/// Returns the number of files whose extraction failed.
fn stage(
    library: &Library,
    batch: &ImportBatch,
    options: &StagingOptions,
    config: &AppConfig,
    reporter: &CliReporter,
) -> anyhow::Result<usize> {
    let extractor = extractor(config);
    let report = library.prepare_import(
        batch,
        options,
        extractor.as_ref(),
        reporter,
        &CancellationToken::new(),
    )?;
    info!(
        "Batch {}: {} files listed, {} allowed, {} extracted, {} failed",
        batch.key.to_string().cyan(),
        report.listed,
        report.allowed,
        report.extracted.to_string().green(),
        report.failed.to_string().red()
    );
    Ok(report.failed)
}

fn commit_options(library: &Library, args: &CommitArgs) -> anyhow::Result<CommitOptions> {
    let mut options = CommitOptions::from_config(library.config());
    if !args.accept.is_empty() {
        let accepted = args
            .accept
            .iter()
            .map(|s| MatchType::parse(s).ok_or_else(|| anyhow!("unknown match type '{}'", s)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        options = options.accept(accepted);
    }
    if args.no_provenance {
        options.propagate_provenance = false;
    }
    Ok(options)
}

fn find_similar(library: &Library, granularity: Granularity, background: bool) -> anyhow::Result<usize> {
    if !background {
        let (tx, rx) = std::sync::mpsc::channel();
        let follower = thread::spawn(move || progress::follow_search(&rx));
        let stored = library.find_similar_duplicates(
            granularity,
            &ContentSimilarity,
            &tx,
            &CancellationToken::new(),
        );
        drop(tx);
        let _ = follower.join();
        return Ok(stored?);
    }

    let plan = library.plan_similarity_search(granularity)?;
    let handle = shoebox_core::spawn_search(plan, Arc::new(ContentSimilarity))?;
    eprintln!("Searching in the background; enter 'q' to cancel");

    let token = handle.cancellation_token();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                    token.cancel();
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    progress::follow_search(handle.events());
    let outcome = handle.join()?;
    if outcome.cancelled {
        warn!("Search cancelled; storing the partitions that finished");
    }
    Ok(library.store_search_outcome(&outcome)?)
}

fn parse_timestamp(s: &str) -> anyhow::Result<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y:%m:%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s.trim(), fmt).ok())
        .ok_or_else(|| anyhow!("cannot parse timestamp '{}'", s))
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
