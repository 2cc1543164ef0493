use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use confpatch::config::{discover, load_from_path, StrategyKind};
use confpatch::{
    inspect, patch, plan, BackupPolicy, PatchError, PatchOutcome, PatchRequest, PatchResult,
    SubstitutionRule,
};
use similar::{ChangeTag, TextDiff};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "confpatch")]
#[command(about = "Atomically rewrite values in configuration files", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite values in a configuration file
    Apply {
        /// File to patch
        target: PathBuf,

        /// Substitutions as KEY=VALUE
        #[arg(required = true, value_name = "KEY=VALUE", value_parser = parse_pair)]
        pairs: Vec<(String, String)>,

        #[command(flatten)]
        matching: MatchArgs,

        /// Fail if any key matches nothing
        #[arg(long)]
        required: bool,

        /// Rewrite only the first occurrence of each key
        #[arg(long)]
        first_match: bool,

        /// Dry run - report matches without modifying the file
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Back up the original first, to PATH or to TARGET.bak
        #[arg(long, value_name = "PATH", num_args = 0..=1)]
        backup: Option<Option<PathBuf>>,

        /// Do not take an advisory lock on the target
        #[arg(long)]
        no_lock: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Apply rules files (a single file, or every *.toml in a directory)
    Run {
        /// Rules file or directory of rules files
        path: PathBuf,

        /// Dry run - report matches without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,
    },

    /// Print the values keys currently have
    Show {
        /// File to read
        target: PathBuf,

        /// Keys to look up
        #[arg(required = true)]
        keys: Vec<String>,

        #[command(flatten)]
        matching: MatchArgs,
    },
}

#[derive(Args)]
struct MatchArgs {
    /// How keys are located in the file
    #[arg(short, long, value_enum, default_value_t = StrategyArg::Json)]
    strategy: StrategyArg,

    /// Capture pattern for a key under the regex strategy
    #[arg(short, long = "pattern", value_name = "KEY=REGEX", value_parser = parse_pair)]
    patterns: Vec<(String, String)>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Json,
    Quoted,
    Regex,
    Ini,
}

impl From<StrategyArg> for StrategyKind {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Json => StrategyKind::Json,
            StrategyArg::Quoted => StrategyKind::Quoted,
            StrategyArg::Regex => StrategyKind::Regex,
            StrategyArg::Ini => StrategyKind::Ini,
        }
    }
}

impl MatchArgs {
    /// Build one rule per pair, or exit with a usage error.
    fn rules(&self, pairs: Vec<(String, String)>) -> Vec<SubstitutionRule> {
        let kind = StrategyKind::from(self.strategy);

        if kind != StrategyKind::Regex && !self.patterns.is_empty() {
            usage_error("--pattern is only valid with --strategy regex");
        }
        for (key, _) in &self.patterns {
            if !pairs.iter().any(|(k, _)| k == key) {
                usage_error(&format!("--pattern given for unknown key '{key}'"));
            }
        }

        pairs
            .into_iter()
            .map(|(key, value)| {
                let pattern = match kind {
                    StrategyKind::Regex => match self.patterns.iter().find(|(k, _)| *k == key) {
                        Some((_, pattern)) => pattern.as_str(),
                        None => usage_error(&format!(
                            "key '{key}' needs --pattern {key}=REGEX under --strategy regex"
                        )),
                    },
                    _ => "",
                };
                SubstitutionRule::new(key, value, kind.to_strategy(pattern))
            })
            .collect()
    }
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn usage_error(message: &str) -> ! {
    Cli::command().error(ErrorKind::ValueValidation, message).exit()
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Apply {
            target,
            pairs,
            matching,
            required,
            first_match,
            dry_run,
            backup,
            no_lock,
            diff,
        } => {
            let rules = matching.rules(pairs).into_iter().map(|mut rule| {
                rule.required = required;
                rule.first_match_only = first_match;
                rule
            });
            let backup = backup.map(|path| match path {
                Some(path) => BackupPolicy::At(path),
                None => BackupPolicy::Beside,
            });
            let request = PatchRequest::builder(target)
                .rules(rules)
                .dry_run(dry_run)
                .backup(backup)
                .lock(!no_lock)
                .build();
            cmd_apply(&request, diff)
        }

        Commands::Run {
            path,
            dry_run,
            diff,
        } => cmd_run(&path, dry_run, diff),

        Commands::Show {
            target,
            keys,
            matching,
        } => {
            let pairs = keys.into_iter().map(|key| (key, String::new())).collect();
            cmd_show(&target, matching.rules(pairs))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            if let Some(patch_err) = err.downcast_ref::<PatchError>() {
                explain(patch_err);
            }
            ExitCode::from(1)
        }
    }
}

/// Extra guidance for errors an operator has to act on.
fn explain(err: &PatchError) {
    match err {
        PatchError::RenameFailed { temp_path, target, .. } => {
            eprintln!("  {}", "The target was not modified.".yellow());
            eprintln!("  Patched content: {}", temp_path.display());
            eprintln!(
                "  Recover by moving it over {} or delete it",
                target.display()
            );
        }
        PatchError::TargetLocked { .. } => {
            eprintln!("  Another process is patching this file; retry once it finishes");
        }
        PatchError::NoMatchForRequiredRule { .. } => {
            eprintln!("  Possible causes:");
            eprintln!("    - Key spelled differently in the file");
            eprintln!("    - Wrong --strategy for this file format");
            eprintln!("    - File not yet created by the package installer");
        }
        _ => {}
    }
}

/// Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

/// Patch one request, printing per-key results and an optional diff.
fn execute(request: &PatchRequest, show_diff: bool) -> Result<PatchResult> {
    println!("Target: {}", request.target_path().display());
    if request.dry_run() {
        println!("{}", "  [DRY RUN - nothing will be written]".cyan());
    }

    let preview = if show_diff { Some(plan(request)?) } else { None };
    let result = patch(request)?;

    for (key, count) in &result.matches_applied {
        if *count > 0 {
            println!("{} {}: {} match(es)", "✓".green(), key, count);
        } else {
            println!("{} {}: no match", "⊘".yellow(), key);
        }
    }

    match result.outcome {
        PatchOutcome::Committed => println!(
            "{} Patched ({} bytes changed)",
            "✓".green(),
            result.bytes_changed
        ),
        PatchOutcome::Unchanged => println!("{} Already up to date", "⊙".yellow()),
        PatchOutcome::DryRun => println!("{} Dry run: no changes written", "⊙".cyan()),
    }
    if let Some(backup) = &result.backup_path {
        println!("  Backup: {}", backup.display());
    }

    if let Some(preview) = preview {
        if !preview.is_noop() {
            display_diff(preview.target(), preview.original(), preview.patched());
        }
    }

    Ok(result)
}

fn cmd_apply(request: &PatchRequest, show_diff: bool) -> Result<()> {
    let result = execute(request, show_diff)?;
    if result.outcome == PatchOutcome::Committed && result.unmatched().next().is_some() {
        println!(
            "{} some keys matched nothing; use --required to make that an error",
            "⚠".yellow()
        );
    }
    Ok(())
}

fn cmd_run(path: &Path, dry_run: bool, show_diff: bool) -> Result<()> {
    let files = discover(path)?;

    let mut committed = 0;
    let mut unchanged = 0;
    let mut dry = 0;

    for file in files {
        println!("Loading rules from {}...", file.display());

        let config = load_from_path(&file)?;
        if !config.meta.name.is_empty() {
            println!("Rule set: {}", config.meta.name.bold());
        }
        if let Some(description) = &config.meta.description {
            println!("  {}", description.dimmed());
        }
        let request = config
            .to_request(file.parent(), dry_run)
            .with_context(|| format!("invalid rules file {}", file.display()))?;

        // provisioning halts at the first failed file
        let result = execute(&request, show_diff)
            .with_context(|| format!("while applying {}", file.display()))?;

        match result.outcome {
            PatchOutcome::Committed => committed += 1,
            PatchOutcome::Unchanged => unchanged += 1,
            PatchOutcome::DryRun => dry += 1,
        }
        println!();
    }

    println!("{}", "Summary:".bold());
    println!("  {} patched", format!("{}", committed).green());
    println!("  {} already up to date", format!("{}", unchanged).yellow());
    if dry_run {
        println!("  {} checked (dry run)", format!("{}", dry).cyan());
    }

    Ok(())
}

fn cmd_show(target: &Path, rules: Vec<SubstitutionRule>) -> Result<()> {
    for entry in inspect(target, &rules)? {
        if entry.values.is_empty() {
            println!("{}: {}", entry.key, "(not found)".yellow());
        }
        for value in &entry.values {
            println!("{}: {}", entry.key, value);
        }
    }
    Ok(())
}
