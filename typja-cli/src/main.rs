mod config;
mod discover;
mod report;

use std::collections::BTreeSet;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use pathdiff::diff_paths;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use typja_core::{
    LintOptions, Linter, SourceFile, TemplateAnalyzer, TypeRegistry, TypeResolver, ValidationIssue,
};

use crate::config::{locate_config, Config, ConfigError, CONFIG_FILE_NAME, DEFAULT_CONFIG};
use crate::discover::{collect_templates, TemplateFilter};
use crate::report::{write_json, write_text, FileReport, Summary};

const CHECK_AFTER_HELP: &str = "\
Subcommands:
  typja check              Check templates against their typja declarations (default).
  typja init               Write a default typja.toml.

See `typja <subcommand> --help` for command-specific options.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "typja check",
    version,
    about = "Check Jinja templates against their typja declarations.",
    after_help = CHECK_AFTER_HELP
)]
struct CheckCli {
    /// Directory to start looking for typja.toml from.
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    root: PathBuf,

    /// Use this configuration file instead of searching for one.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Rewrite legacy Optional/Union annotations in place.
    #[arg(short, long)]
    fix: bool,

    /// Fail when warnings are found.
    #[arg(short, long)]
    strict: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Parser)]
#[command(name = "typja init", version, about = "Write a default typja.toml.")]
struct InitCli {
    /// Directory that receives typja.toml.
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    root: PathBuf,

    /// Overwrite an existing typja.toml.
    #[arg(short, long)]
    force: bool,
}

fn main() -> Result<()> {
    init_tracing();

    let mut raw: Vec<OsString> = env::args_os().collect();
    if raw.get(1).map(|arg| arg == "init").unwrap_or(false) {
        return handle_init(raw);
    }
    if raw.get(1).map(|arg| arg == "check").unwrap_or(false) {
        raw.remove(1);
    }

    let cli = CheckCli::parse_from(raw);
    run_check(&cli)
}

fn init_tracing() {
    if let Ok(filter) = EnvFilter::try_from_env("TYPJA_LOG") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(io::stderr)
            .init();
    }
}

fn handle_init(raw: Vec<OsString>) -> Result<()> {
    let mut args = raw;
    args.remove(1); // drop the literal "init"
    let cli = InitCli::parse_from(args);
    run_init(&cli)
}

fn run_init(cli: &InitCli) -> Result<()> {
    let target = cli.root.join(CONFIG_FILE_NAME);
    if target.exists() && !cli.force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            target.display()
        );
    }

    fs::create_dir_all(&cli.root)
        .with_context(|| format!("Failed to create {:?}", cli.root))?;
    fs::write(&target, DEFAULT_CONFIG).with_context(|| format!("Failed to write {:?}", target))?;
    println!("Created {}", target.display());
    Ok(())
}

fn run_check(cli: &CheckCli) -> Result<()> {
    let root = fs::canonicalize(&cli.root)
        .with_context(|| format!("Failed to access {:?}", cli.root))?;

    let config_path = match locate_config(&root, cli.config.as_deref()) {
        Ok(path) => path,
        Err(err @ ConfigError::NotFound { .. }) => {
            bail!("{err}\nhint: run `typja init` to create one, or point --root at the project")
        }
        Err(err) => return Err(err.into()),
    };
    let config_path = fs::canonicalize(&config_path).unwrap_or(config_path);
    let config = Config::load(&config_path)?;
    let project_root = config.root_path(&config_path);
    let fail_on_warning = cli.strict || config.fail_on_warning();
    debug!(
        config = %config_path.display(),
        root = %project_root.display(),
        "starting check"
    );

    let mut registry = TypeRegistry::new();
    let mut resolver =
        TypeResolver::new(&project_root).with_exclude_patterns(&config.environment.exclude_patterns);
    let type_paths = config.type_paths(&project_root);
    if !type_paths.is_empty() {
        resolver.resolve_paths(&type_paths);
        resolver.populate_registry(&mut registry);
    }

    let filter = TemplateFilter::new(
        &config.environment.include_patterns,
        &config.environment.exclude_patterns,
    );
    let mut templates = BTreeSet::new();
    for dir in config.template_dirs(&project_root) {
        collect_templates(&dir, &filter, &mut templates);
    }
    debug!(templates = templates.len(), "discovered templates");

    if templates.is_empty() && cli.format == OutputFormat::Text {
        println!("No templates found to check.");
        return Ok(());
    }

    let checker = Checker {
        analyzer: TemplateAnalyzer::new(&registry)
            .with_resolver(&resolver)
            .with_options(config.analyzer_options()),
        linter: Linter::new(),
        lint_options: config.lint_options(),
    };

    let mut reports = Vec::new();
    for path in templates {
        let mut source = SourceFile::load(&path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let display = display_path(&path, &project_root);
        let mut issues = checker.check(&source.contents, &display);

        if cli.fix && config.linting.fix_union_syntax {
            let fixed = checker.linter.auto_fix(&source.contents, &issues);
            if fixed != source.contents {
                fs::write(&path, &fixed).with_context(|| format!("Failed to write {:?}", path))?;
                eprintln!("Fixed {}", display);
                source.contents = fixed;
                issues = checker.check(&source.contents, &display);
            }
        }

        reports.push(FileReport {
            source,
            display,
            issues,
        });
    }

    let summary = Summary::collect(&reports);
    match cli.format {
        OutputFormat::Text => {
            write_text(&mut io::stderr().lock(), &reports, &config.errors)?;
            println!("{summary}");
        }
        OutputFormat::Json => write_json(&mut io::stdout().lock(), &reports)?,
    }

    if summary.errors > 0 {
        bail!("{} error(s) found", summary.errors);
    }
    if summary.warnings > 0 && fail_on_warning {
        bail!("{} warning(s) found and warnings are treated as failures", summary.warnings);
    }
    Ok(())
}

struct Checker<'r> {
    analyzer: TemplateAnalyzer<'r>,
    linter: Linter,
    lint_options: LintOptions,
}

impl Checker<'_> {
    fn check(&self, contents: &str, display: &str) -> Vec<ValidationIssue> {
        let mut issues = self.analyzer.analyze_template(contents, display);
        issues.extend(self.linter.lint_template(contents, display, &self.lint_options));
        issues
    }
}

fn display_path(path: &Path, root: &Path) -> String {
    diff_paths(path, root)
        .unwrap_or_else(|| path.to_path_buf())
        .to_string_lossy()
        .replace('\\', "/")
}
