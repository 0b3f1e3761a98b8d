//! `pstore` - profile settings store CLI.
//!
//! Human-readable output by default, JSON with `--json`.
#![forbid(unsafe_code)]

use std::io;

use clap::Parser;
use console::style;
use serde::Serialize;
use uuid::Uuid;

use pstore::backup::{BackupCoordinator, BackupFormat};
use pstore::cli::{BackupCommand, BackupTarget, Cli, Commands};
use pstore::config::{self, StoreConfig};
use pstore::error::{Result, StoreError};
use pstore::profile::{ProfileRecord, SettingValue, Variant};
use pstore::{Engine, logging};

/// Build information embedded at compile time.
mod build_info {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    pub fn git_sha() -> &'static str {
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
    }

    pub fn git_dirty() -> &'static str {
        option_env!("VERGEN_GIT_DIRTY").unwrap_or("false")
    }

    pub fn build_timestamp() -> &'static str {
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown")
    }

    pub fn rustc_semver() -> &'static str {
        option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown")
    }

    pub fn target() -> &'static str {
        option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown")
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }
    logging::init_logging(cli.use_json(), cli.verbose, cli.quiet);

    if let Err(e) = run(&cli).await {
        output_error(&cli, &e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        None => {
            print_quick_start(cli);
            Ok(())
        }
        Some(Commands::Version) => {
            cmd_version(cli);
            Ok(())
        }
        Some(Commands::Completions(args)) => {
            use clap::CommandFactory;
            clap_complete::generate(args.shell, &mut Cli::command(), "pstore", &mut io::stdout());
            Ok(())
        }
        Some(Commands::Config(args)) => cmd_config(cli, args),
        Some(Commands::Backup(BackupCommand::Load(target))) => {
            let config = load_config(cli)?;
            cmd_backup_load(cli, &config, target)
        }
        Some(Commands::Backup(BackupCommand::List { dir })) => {
            let config = load_config(cli)?;
            cmd_backup_list(cli, &config, dir.as_deref())
        }
        Some(command) => {
            let config = load_config(cli)?;
            let engine = Engine::start(config).await?;
            let result = dispatch(cli, &engine, command);
            let stopped = engine.shutdown().await;
            result.and(stopped)
        }
    }
}

fn dispatch(cli: &Cli, engine: &Engine, command: &Commands) -> Result<()> {
    match command {
        Commands::List(args) => cmd_list(cli, engine, args.variant),
        Commands::Show(args) => cmd_show(cli, engine, &args.profile, args.nested),
        Commands::Add(args) => cmd_add(cli, engine, args),
        Commands::Remove(args) => cmd_remove(cli, engine, &args.profile),
        Commands::Get(args) => cmd_get(cli, engine, args),
        Commands::Set(args) => cmd_set(cli, engine, args),
        Commands::Unset(args) => cmd_unset(cli, engine, &args.profile, &args.key),
        Commands::Backup(BackupCommand::Save(target)) => cmd_backup_save(cli, engine, target),
        Commands::Backup(BackupCommand::Restore(target)) => cmd_backup_restore(cli, engine, target),
        Commands::Stats => cmd_stats(cli, engine),
        Commands::Backup(BackupCommand::Load(_) | BackupCommand::List { .. })
        | Commands::Config(_)
        | Commands::Version
        | Commands::Completions(_) => Ok(()),
    }
}

fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let mut config = config::load_or_default(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.storage.database_path = Some(config::resolve_path(db, &std::env::current_dir()?)?);
    }
    Ok(config)
}

// === Profiles ===

/// Find a profile by id or case-insensitive name.
fn resolve_profile(engine: &Engine, reference: &str) -> Result<ProfileRecord> {
    let store = engine.store();
    if let Ok(id) = Uuid::parse_str(reference) {
        return store.get(id).ok_or(StoreError::ProfileNotFound { id });
    }
    store
        .find_by_name(reference)
        .ok_or_else(|| StoreError::ProfileNameNotFound {
            name: reference.to_string(),
        })
}

#[derive(Serialize)]
struct ProfileSummary {
    id: Uuid,
    name: String,
    variant: Variant,
    is_default: bool,
    settings: usize,
    last_updated: String,
}

impl From<&ProfileRecord> for ProfileSummary {
    fn from(p: &ProfileRecord) -> Self {
        Self {
            id: p.id(),
            name: p.name().to_string(),
            variant: p.variant(),
            is_default: p.is_default(),
            settings: p.settings().len(),
            last_updated: p.last_updated().to_rfc3339(),
        }
    }
}

fn cmd_list(cli: &Cli, engine: &Engine, variant: Option<Variant>) -> Result<()> {
    let mut profiles: Vec<ProfileRecord> = engine
        .store()
        .get_all()
        .into_iter()
        .filter(|p| variant.is_none_or(|v| p.variant() == v))
        .collect();
    profiles.sort_by_key(ProfileRecord::name_key);

    if cli.use_json() {
        let summaries: Vec<ProfileSummary> = profiles.iter().map(ProfileSummary::from).collect();
        output_json(cli, &summaries);
        return Ok(());
    }

    if profiles.is_empty() {
        println!("No profiles. Create one with {}", style("pstore add <NAME>").green());
        return Ok(());
    }
    println!("{}", style(format!("{} profile(s)", profiles.len())).bold());
    for p in &profiles {
        let marker = if p.is_default() { "*" } else { " " };
        println!(
            "{marker} {:<24} {:<9} {:>4} settings  {}",
            style(p.name()).cyan(),
            p.variant(),
            p.settings().len(),
            style(p.id()).dim()
        );
    }
    Ok(())
}

fn cmd_show(cli: &Cli, engine: &Engine, reference: &str, nested: bool) -> Result<()> {
    let profile = resolve_profile(engine, reference)?;

    if cli.use_json() {
        if nested {
            output_json(
                cli,
                &serde_json::json!({
                    "id": profile.id(),
                    "name": profile.name(),
                    "settings": profile.nested_settings()?,
                }),
            );
        } else {
            output_json(cli, &profile);
        }
        return Ok(());
    }

    println!("{} {}", style(profile.name()).bold().cyan(), style(profile.id()).dim());
    println!("  variant:      {}", profile.variant());
    println!("  default:      {}", profile.is_default());
    if let Some(d) = profile.description() {
        println!("  description:  {d}");
    }
    println!("  last updated: {}", profile.last_updated().to_rfc3339());
    println!();
    if profile.settings().is_empty() {
        println!("  {}", style("(no settings)").dim());
    } else if nested {
        let tree = serde_yaml::to_string(&profile.nested_settings()?)?;
        for line in tree.lines() {
            println!("  {line}");
        }
    } else {
        for (key, value) in profile.settings() {
            println!("  {} = {value}", style(key).green());
        }
    }
    Ok(())
}

fn cmd_add(cli: &Cli, engine: &Engine, args: &pstore::cli::AddArgs) -> Result<()> {
    let store = engine.store();
    if store.find_by_name(&args.name).is_some() {
        return Err(StoreError::DuplicateName {
            name: args.name.clone(),
        });
    }

    let mut profile = ProfileRecord::new(args.name.trim())
        .with_variant(args.variant)
        .with_default_flag(args.default);
    if let Some(d) = &args.description {
        profile = profile.with_description(d.clone());
    }
    profile.validate()?;
    if !store.add(profile.clone()) {
        return Err(StoreError::Validation(format!(
            "profile '{}' was rejected",
            args.name
        )));
    }

    if cli.use_json() {
        output_json(cli, &profile);
    } else {
        println!(
            "{} {} {}",
            style("Created").green().bold(),
            style(profile.name()).cyan(),
            style(profile.id()).dim()
        );
    }
    Ok(())
}

fn cmd_remove(cli: &Cli, engine: &Engine, reference: &str) -> Result<()> {
    let profile = resolve_profile(engine, reference)?;
    engine.store().remove(profile.id());

    if cli.use_json() {
        output_json(cli, &serde_json::json!({ "removed": profile.id(), "name": profile.name() }));
    } else {
        println!("{} {}", style("Removed").yellow().bold(), profile.name());
    }
    Ok(())
}

// === Settings ===

/// Split `category.key` at the last separator.
fn split_path(path: &str) -> Option<(&str, &str)> {
    path.rsplit_once('.')
}

fn cmd_get(cli: &Cli, engine: &Engine, args: &pstore::cli::GetArgs) -> Result<()> {
    let profile = resolve_profile(engine, &args.profile)?;
    let default = args.default.as_deref().map(SettingValue::parse_loose);
    let value = match split_path(&args.key) {
        Some((category, key)) => profile.get_setting(category, key, default),
        None => profile.get_flat_setting(&args.key, default),
    };

    if cli.use_json() {
        output_json(cli, &serde_json::json!({ "key": args.key, "value": value }));
        return Ok(());
    }
    match value {
        Some(v) => {
            println!("{v}");
            Ok(())
        }
        None => Err(StoreError::Validation(format!(
            "setting '{}' is not set on '{}'",
            args.key,
            profile.name()
        ))),
    }
}

fn cmd_set(cli: &Cli, engine: &Engine, args: &pstore::cli::SetArgs) -> Result<()> {
    let store = engine.store();
    let profile = if args.create {
        store.ensure(&args.profile)?
    } else {
        resolve_profile(engine, &args.profile)?
    };

    let value = SettingValue::parse_loose(&args.value);
    let updated = match split_path(&args.key) {
        Some((category, key)) => store.set_setting(profile.id(), category, key, value.clone())?,
        None => store.set_flat_setting(profile.id(), &args.key, value.clone())?,
    };

    if cli.use_json() {
        output_json(
            cli,
            &serde_json::json!({
                "profile": updated.id(),
                "key": args.key,
                "value": value,
                "type": value.type_name(),
            }),
        );
    } else {
        println!(
            "{} {} = {} ({})",
            style("Set").green().bold(),
            style(&args.key).cyan(),
            value,
            style(value.type_name()).dim()
        );
    }
    Ok(())
}

fn cmd_unset(cli: &Cli, engine: &Engine, reference: &str, key: &str) -> Result<()> {
    let profile = resolve_profile(engine, reference)?;
    let previous = engine.store().remove_setting(profile.id(), key)?;

    if cli.use_json() {
        output_json(cli, &serde_json::json!({ "key": key, "removed": previous }));
    } else if previous.is_some() {
        println!("{} {}", style("Unset").yellow().bold(), key);
    } else {
        println!("{key} was not set");
    }
    Ok(())
}

// === Backups ===

fn backup_selection(
    config: &StoreConfig,
    target: &BackupTarget,
) -> Result<(BackupCoordinator, BackupFormat, Variant)> {
    let dir = match &target.dir {
        Some(dir) => dir.clone(),
        None => config::backup_dir(config)?,
    };
    Ok((
        BackupCoordinator::new(dir),
        target.format.unwrap_or(config.backup.format),
        target.variant.unwrap_or(config.backup.variant),
    ))
}

fn cmd_backup_save(cli: &Cli, engine: &Engine, target: &BackupTarget) -> Result<()> {
    let (coordinator, format, variant) = backup_selection(engine.config(), target)?;
    let path = coordinator.snapshot(engine.store(), format, variant)?;

    if cli.use_json() {
        output_json(
            cli,
            &serde_json::json!({ "path": path, "format": format, "variant": variant }),
        );
    } else {
        println!("{} {}", style("Saved").green().bold(), path.display());
    }
    Ok(())
}

fn cmd_backup_load(cli: &Cli, config: &StoreConfig, target: &BackupTarget) -> Result<()> {
    let (coordinator, format, variant) = backup_selection(config, target)?;
    let profiles = coordinator.load(format, variant);

    if cli.use_json() {
        output_json(cli, &profiles);
        return Ok(());
    }
    println!(
        "{} profile(s) in {}",
        profiles.len(),
        coordinator.path_for(format, variant).display()
    );
    for p in &profiles {
        println!(
            "  {:<24} {:>4} settings  {}",
            style(p.name()).cyan(),
            p.settings().len(),
            style(p.id()).dim()
        );
    }
    Ok(())
}

fn cmd_backup_restore(cli: &Cli, engine: &Engine, target: &BackupTarget) -> Result<()> {
    let (coordinator, format, variant) = backup_selection(engine.config(), target)?;
    let report = coordinator.restore(engine.store(), format, variant);

    if cli.use_json() {
        output_json(cli, &report);
    } else {
        println!(
            "{} {} added, {} updated, {} skipped",
            style("Restored").green().bold(),
            report.added,
            report.updated,
            report.skipped
        );
    }
    Ok(())
}

fn cmd_backup_list(cli: &Cli, config: &StoreConfig, dir: Option<&std::path::Path>) -> Result<()> {
    let dir = match dir {
        Some(d) => d.to_path_buf(),
        None => config::backup_dir(config)?,
    };
    let files = BackupCoordinator::new(&dir).list();

    if cli.use_json() {
        output_json(cli, &files);
        return Ok(());
    }
    if files.is_empty() {
        println!("No backups in {}", dir.display());
    }
    for f in &files {
        println!(
            "  {:<9} {:<5} {:>8} bytes  {}",
            f.variant,
            f.format,
            f.size_bytes,
            f.path.display()
        );
    }
    Ok(())
}

// === Utilities ===

fn cmd_stats(cli: &Cli, engine: &Engine) -> Result<()> {
    let cache = engine.store().stats();
    let rows = engine
        .synchronizer()
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .count()?;

    if cli.use_json() {
        output_json(
            cli,
            &serde_json::json!({
                "cache": cache,
                "persistence": engine.persistence_stats(),
                "database_rows": rows,
            }),
        );
    } else {
        println!("{}", style("Cache").bold());
        println!("  entries:   {} / {}", cache.entries, cache.max_entries);
        println!("  ttl:       {}s", engine.config().cache.ttl_secs);
        println!("{}", style("Database").bold());
        println!("  rows:      {rows}");
    }
    Ok(())
}

fn cmd_config(cli: &Cli, args: &pstore::cli::ConfigArgs) -> Result<()> {
    let path = match &cli.config {
        Some(p) => p.clone(),
        None => config::default_config_path()?,
    };

    if args.path {
        println!("{}", path.display());
        return Ok(());
    }

    if args.init {
        if path.exists() && !args.force {
            return Err(StoreError::ConfigInvalid(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        config::save_config(&StoreConfig::default(), &path)?;
        if cli.use_json() {
            output_json(cli, &serde_json::json!({ "created": path }));
        } else {
            println!("{} {}", style("Wrote").green().bold(), path.display());
        }
        return Ok(());
    }

    let config = load_config(cli)?;
    if cli.use_json() {
        output_json(cli, &config);
    } else {
        println!("{}", style(format!("# {}", path.display())).dim());
        let text = toml::to_string_pretty(&config)
            .map_err(|e| StoreError::ConfigParse(format!("TOML: {e}")))?;
        print!("{text}");
    }
    Ok(())
}

fn cmd_version(cli: &Cli) {
    if cli.use_json() {
        output_json(
            cli,
            &serde_json::json!({
                "version": build_info::VERSION,
                "git_sha": build_info::git_sha(),
                "git_dirty": build_info::git_dirty() == "true",
                "build_timestamp": build_info::build_timestamp(),
                "rustc_version": build_info::rustc_semver(),
                "target": build_info::target(),
            }),
        );
    } else {
        println!("pstore {}", build_info::VERSION);
        println!(
            "git: {}{}",
            build_info::git_sha(),
            if build_info::git_dirty() == "true" {
                " (dirty)"
            } else {
                ""
            }
        );
        println!("built: {}", build_info::build_timestamp());
        println!("rustc: {}", build_info::rustc_semver());
        println!("target: {}", build_info::target());
    }
}

fn print_quick_start(cli: &Cli) {
    if cli.use_json() {
        output_json(
            cli,
            &serde_json::json!({
                "tool": "pstore",
                "version": build_info::VERSION,
                "profiles": ["pstore list", "pstore show <PROFILE>", "pstore add <NAME>", "pstore remove <PROFILE>"],
                "settings": ["pstore get <PROFILE> <KEY>", "pstore set <PROFILE> <KEY> <VALUE>", "pstore unset <PROFILE> <KEY>"],
                "backups": ["pstore backup save", "pstore backup load", "pstore backup restore", "pstore backup list"],
            }),
        );
        return;
    }

    println!("{} {} - profile settings store\n", style("pstore").bold().cyan(), build_info::VERSION);
    println!("{}", style("QUICK START").bold().underlined());
    println!();
    println!("  {}  Create a profile", style("pstore add Default").green());
    println!(
        "  {}  Write a setting",
        style("pstore set Default prayerSettings.boneHandler Bank").green()
    );
    println!(
        "  {}  Read it back",
        style("pstore get Default prayerSettings.boneHandler").green()
    );
    println!("  {}  Back up to JSON", style("pstore backup save").green());
    println!();
    println!("Run {} for full help", style("pstore --help").yellow());
}

// === Output ===

fn output_json<T: Serialize>(cli: &Cli, data: &T) {
    let rendered = if cli.use_compact_json() {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    match rendered {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("failed to render JSON: {e}"),
    }
}

fn output_error(cli: &Cli, error: &StoreError) {
    if cli.use_json() {
        let json = serde_json::json!({
            "error": true,
            "message": error.to_string(),
            "suggestion": error.suggestion(),
            "recoverable": error.is_user_recoverable(),
        });
        eprintln!("{json:#}");
    } else {
        eprintln!("{}: {}", style("Error").red().bold(), error);
        if let Some(suggestion) = error.suggestion() {
            eprintln!("{}: {}", style("Hint").yellow(), suggestion);
        }
    }
}
