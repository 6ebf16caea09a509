use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use emc::config::{ConfigError, SessionConfig};
use emc::diag::Diagnostic;
use emc::dot::emit_cfg_dot;
use emc::hir::UntypedItem;
use emc::id::{FileId, ItemRef};
use emc::session::{Session, SessionError};
use emc::source::LineIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    Diagnostics,
    Ast,
    Untyped,
    Typed,
    Cfg,
}

#[derive(Parser, Debug)]
#[command(
    name = "emc",
    version,
    about = "Ember compiler front end: incremental type checking and initialization analysis"
)]
struct Cli {
    /// Input .em source files
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Diagnostics)]
    emit: EmitStage,

    /// Function whose CFG is emitted (default: the top-level body)
    #[arg(long)]
    function: Option<String>,

    /// JSON session config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads for parallel checking
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Debug-level tracing to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("no function named `{0}` in any input")]
    UnknownFunction(String),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("emc: error: {}", e);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("EMC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<SessionConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(jobs) = cli.jobs {
        if jobs == 0 {
            return Err(ConfigError::ZeroJobs.into());
        }
        config.jobs = Some(jobs);
    }
    Ok(config)
}

fn open_sources(session: &Session, sources: &[PathBuf]) -> Result<Vec<FileId>, CliError> {
    sources
        .iter()
        .map(|path| {
            let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), bytes = text.len(), "opened source");
            Ok(session.open_file(display_name(path), text))
        })
        .collect()
}

fn display_name(path: &Path) -> String {
    path.display().to_string()
}

fn run(cli: &Cli) -> Result<ExitCode, CliError> {
    let config = load_config(cli)?;
    debug!(?config, emit = ?cli.emit, "starting session");
    let session = Session::new(config)?;
    let files = open_sources(&session, &cli.sources)?;

    match cli.emit {
        EmitStage::Diagnostics => emit_diagnostics(&session),
        EmitStage::Ast => {
            for &file in &files {
                let parsed = session.parse(file)?;
                println!("// {}", session.file_name(file).unwrap_or_default());
                println!("{:#?}", parsed.program);
            }
            Ok(ExitCode::SUCCESS)
        }
        EmitStage::Untyped => {
            for &file in &files {
                println!("// {}", session.file_name(file).unwrap_or_default());
                for entry in session.items(file)?.iter() {
                    let untyped = session.untyped_item(ItemRef::new(file, entry.id))?;
                    print!("{}", render_untyped(&untyped));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        EmitStage::Typed => {
            for &file in &files {
                println!("// {}", session.file_name(file).unwrap_or_default());
                print!("{}", session.typed_graph(file)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        EmitStage::Cfg => {
            let name = cli.function.as_deref().unwrap_or("<top>");
            let mut found = false;
            for &file in &files {
                let Some(item) = session.find_item(file, name)? else {
                    continue;
                };
                let untyped = session.untyped_item(item)?;
                if !untyped.kind.has_body() {
                    continue;
                }
                let analysis = session.init_analysis(item)?;
                print!("{}", emit_cfg_dot(name, &untyped, &analysis));
                found = true;
            }
            if found {
                Ok(ExitCode::SUCCESS)
            } else {
                Err(CliError::UnknownFunction(name.to_string()))
            }
        }
    }
}

fn emit_diagnostics(session: &Session) -> Result<ExitCode, CliError> {
    let results = session.check_all()?;
    let mut errors = 0usize;
    let mut warnings = 0usize;
    for (file, diags) in &results {
        if diags.is_empty() {
            continue;
        }
        let text = session.source(*file)?;
        let index = LineIndex::new(&text);
        let name = session.file_name(*file).unwrap_or_else(|| file.to_string());
        for diag in diags.iter() {
            if diag.is_error() {
                errors += 1;
            } else {
                warnings += 1;
            }
            eprintln!("{}", render_diagnostic(&name, &index, diag));
        }
    }
    debug!(files = results.len(), errors, warnings, "check finished");

    if errors > 0 {
        eprintln!(
            "emc: {} error{} emitted",
            errors,
            if errors == 1 { "" } else { "s" }
        );
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn render_diagnostic(name: &str, index: &LineIndex, diag: &Diagnostic) -> String {
    let (line, col) = index.line_col(diag.span.start);
    let mut out = format!("{}:{}:{}: {}", name, line, col, diag);
    for related in &diag.related_spans {
        let (line, col) = index.line_col(related.span.start);
        let _ = write!(out, "\n  note: {}:{}:{}: {}", name, line, col, related.label);
    }
    out
}

fn render_untyped(item: &UntypedItem) -> String {
    let mut out = format!("{} {}\n", item.kind, item.name);
    for id in item.ids() {
        let Some(node) = item.get(id) else {
            continue;
        };
        let indent = "  ".repeat(item.depth(id) + 1);
        let _ = writeln!(
            out,
            "{}{}  @{}..{}",
            indent,
            node.kind.label(),
            node.span.start,
            node.span.end
        );
    }
    out.push('\n');
    out
}
