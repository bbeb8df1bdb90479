//! Quarry CLI - Compile semantic models to SQL
//!
//! Usage:
//!   quarry compile <file.qry> [--query <n>] [--dialect <dialect>] [--output sql|json|verbose]
//!   quarry query <file.qry> <query text>...
//!   quarry check <file.qry>
//!   quarry list <file.qry>
//!
//! Examples:
//!   quarry compile models/orders.qry --dialect tsql
//!   quarry query models/orders.qry "select customer.name, revenue;"
//!   quarry list models/orders.qry --log-level debug

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;

use ariadne::{Color, Label, Report, ReportKind, Source};
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, info, LevelFilter};

use quarry::cache::QueryCache;
use quarry::compile::{
    compile, compile_model, compile_query, load_model, CompileError, CompileOptions, QUERY_FILE,
};
use quarry::config::Settings;
use quarry::dsl::{Diagnostic, Severity};
use quarry::planner::CompiledQuery;
use quarry::semantic::{roots_for_file, FsResolver, SourceResolver};
use quarry::sql::Dialect;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Quarry - compile semantic models to multi-dialect SQL")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $QUARRY_CONFIG, ./quarry.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the queries of a model file to SQL
    Compile {
        /// Path to the model file
        file: PathBuf,

        /// Compile only the n-th query (1-based)
        #[arg(short, long)]
        query: Option<usize>,

        /// SQL dialect to generate (defaults to the configured dialect)
        #[arg(short, long)]
        dialect: Option<DialectArg>,

        /// Output format
        #[arg(short, long, default_value = "sql")]
        output: OutputFormat,

        /// Reject equally short alternative join paths
        #[arg(long)]
        strict_joins: bool,
    },

    /// Compile ad-hoc queries against a model file
    Query {
        /// Path to the model file
        file: PathBuf,

        /// Query text, one query per argument
        #[arg(required = true)]
        text: Vec<String>,

        #[arg(short, long)]
        dialect: Option<DialectArg>,

        #[arg(short, long, default_value = "sql")]
        output: OutputFormat,
    },

    /// Load, bind and plan a model without printing SQL
    Check {
        /// Path to the model file
        file: PathBuf,
    },

    /// List the concepts, datasources and queries of a model
    List {
        /// Path to the model file
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DialectArg {
    Duckdb,
    Postgres,
    Mysql,
    Tsql,
    Bigquery,
    Snowflake,
    Databricks,
    Redshift,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Duckdb => Dialect::DuckDb,
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Tsql => Dialect::TSql,
            DialectArg::Bigquery => Dialect::BigQuery,
            DialectArg::Snowflake => Dialect::Snowflake,
            DialectArg::Databricks => Dialect::Databricks,
            DialectArg::Redshift => Dialect::Redshift,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    /// Output SQL only
    Sql,
    /// Output SQL, schema and datasources as JSON
    Json,
    /// Output SQL with comments
    Verbose,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = LevelFilter::from_str(&cli.log_level).unwrap_or_else(|_| {
        eprintln!("Invalid log level: {}. Using 'warn' instead.", cli.log_level);
        LevelFilter::Warn
    });
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(log_level)
        .init();
    info!(log_level:?; "Starting Quarry");

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            return ExitCode::FAILURE;
        }
    };
    debug!(settings:?; "Loaded settings");

    match cli.command {
        Commands::Compile {
            file,
            query,
            dialect,
            output,
            strict_joins,
        } => {
            let mut options = options_for(&settings, dialect);
            if strict_joins {
                options.planner.strict_join_paths = true;
            }
            cmd_compile(&settings, &file, query, &options, output)
        }
        Commands::Query {
            file,
            text,
            dialect,
            output,
        } => cmd_query(&settings, &file, &text, &options_for(&settings, dialect), output),
        Commands::Check { file } => cmd_check(&settings, &file),
        Commands::List { file } => cmd_list(&settings, &file),
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, quarry::config::SettingsError> {
    match path {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    }
}

fn options_for(settings: &Settings, dialect: Option<DialectArg>) -> CompileOptions {
    let options = settings.compile_options();
    match dialect {
        Some(dialect) => options.with_dialect(dialect.into()),
        None => options,
    }
}

// ============================================================================
// Workspace
// ============================================================================

/// A model file on disk with the resolver for its imports.
struct Workspace {
    root_path: String,
    source: String,
    resolver: FsResolver,
}

impl Workspace {
    fn open(settings: &Settings, file: &Path) -> Result<Self, String> {
        let source = fs::read_to_string(file)
            .map_err(|e| format!("Error reading file '{}': {}", file.display(), e))?;
        let configured = settings.model_roots().map_err(|e| e.to_string())?;
        let roots = roots_for_file(file, &configured);
        debug!(roots:?; "Import roots");
        Ok(Self {
            root_path: file.display().to_string(),
            source,
            resolver: FsResolver::new(roots, settings.models.extension.as_str()),
        })
    }

    /// Print every diagnostic of an error against its source file.
    fn report(&self, err: &CompileError, query_text: Option<&str>) {
        for diag in err.diagnostics() {
            let file = diag.file.clone().unwrap_or_else(|| self.root_path.clone());
            let source = if file == self.root_path {
                Some(self.source.clone())
            } else if file == QUERY_FILE {
                query_text.map(str::to_string)
            } else {
                self.resolver.resolve(&file)
            };
            match source {
                Some(source) => render(&diag, &file, &source),
                None => eprintln!("{}", diag),
            }
        }
    }
}

fn render(diag: &Diagnostic, file: &str, source: &str) {
    let (kind, color) = match diag.severity {
        Severity::Error => (ReportKind::Error, Color::Red),
        Severity::Warning => (ReportKind::Warning, Color::Yellow),
    };
    let end = diag.span.end.min(source.len());
    let span = diag.span.start.min(end)..end;

    let printed = Report::build(kind, (file, span.clone()))
        .with_message(&diag.message)
        .with_label(
            Label::new((file, span))
                .with_message(&diag.message)
                .with_color(color),
        )
        .finish()
        .eprint((file, Source::from(source)));
    if printed.is_err() {
        eprintln!("{}", diag);
    }
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_compile(
    settings: &Settings,
    file: &Path,
    query: Option<usize>,
    options: &CompileOptions,
    output: OutputFormat,
) -> ExitCode {
    let ws = match Workspace::open(settings, file) {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let compiled = match compile(&ws.root_path, &ws.source, &ws.resolver, options) {
        Ok(output) => output.queries,
        Err(e) => {
            ws.report(&e, None);
            return ExitCode::FAILURE;
        }
    };

    let selected: Vec<(usize, &CompiledQuery)> = match query {
        Some(n) => match n.checked_sub(1).and_then(|i| compiled.get(i)) {
            Some(q) => vec![(n, q)],
            None => {
                eprintln!(
                    "Query {} not found; {} has {} queries",
                    n,
                    file.display(),
                    compiled.len()
                );
                return ExitCode::FAILURE;
            }
        },
        None => compiled.iter().enumerate().map(|(i, q)| (i + 1, q)).collect(),
    };

    if selected.is_empty() {
        println!("No queries defined.");
        return ExitCode::SUCCESS;
    }
    print_queries(&selected, &ws.root_path, output)
}

fn cmd_query(
    settings: &Settings,
    file: &Path,
    texts: &[String],
    options: &CompileOptions,
    output: OutputFormat,
) -> ExitCode {
    let ws = match Workspace::open(settings, file) {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let model = match load_model(&ws.root_path, &ws.source, &ws.resolver) {
        Ok(model) => model,
        Err(e) => {
            ws.report(&e, None);
            return ExitCode::FAILURE;
        }
    };

    let cache = settings
        .cache
        .enabled
        .then(|| QueryCache::new(settings.cache.max_entries));

    let mut compiled = Vec::new();
    for (i, text) in texts.iter().enumerate() {
        let result = match &cache {
            Some(cache) => cache.get_or_compile(&model, text, options),
            None => compile_query(&model, text, options).map(std::sync::Arc::new),
        };
        match result {
            Ok(query) => compiled.push((i + 1, query)),
            Err(e) => {
                ws.report(&e, Some(text));
                return ExitCode::FAILURE;
            }
        }
    }
    if let Some(cache) = &cache {
        let stats = cache.stats();
        debug!(entries = stats.entries, hits = stats.hits, misses = stats.misses; "Query cache");
    }

    let selected: Vec<(usize, &CompiledQuery)> =
        compiled.iter().map(|(i, q)| (*i, q.as_ref())).collect();
    print_queries(&selected, QUERY_FILE, output)
}

fn print_queries(queries: &[(usize, &CompiledQuery)], source: &str, output: OutputFormat) -> ExitCode {
    match output {
        OutputFormat::Sql => {
            let sql: Vec<String> = queries.iter().map(|(_, q)| format!("{};", q.sql)).collect();
            println!("{}", sql.join("\n\n"));
        }
        OutputFormat::Json => {
            let values: Vec<&CompiledQuery> = queries.iter().map(|(_, q)| *q).collect();
            match serde_json::to_string_pretty(&values) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    eprintln!("Error serializing output: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        OutputFormat::Verbose => {
            for (n, query) in queries {
                println!("-- Quarry Compiled SQL");
                println!("-- Source: {}", source);
                println!("-- Query: {}", n);
                println!("-- Dialect: {}", query.dialect);
                println!("-- Datasources: {}", query.datasources.join(", "));
                for column in &query.schema {
                    match &column.data_type {
                        Some(data_type) => println!("--   {} {}", column.name, data_type),
                        None => println!("--   {} ?", column.name),
                    }
                }
                println!();
                println!("{};", query.sql);
                println!();
            }
        }
    }
    ExitCode::SUCCESS
}

fn cmd_check(settings: &Settings, file: &Path) -> ExitCode {
    let ws = match Workspace::open(settings, file) {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = load_model(&ws.root_path, &ws.source, &ws.resolver).and_then(|model| {
        compile_model(&model, &settings.compile_options()).map(|queries| (model, queries))
    });
    match result {
        Ok((model, queries)) => {
            println!(
                "OK: {} is valid ({} files, {} concepts, {} datasources, {} queries)",
                file.display(),
                model.files().len(),
                model.concepts().len(),
                model.datasources().len(),
                queries.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            ws.report(&e, None);
            ExitCode::FAILURE
        }
    }
}

fn cmd_list(settings: &Settings, file: &Path) -> ExitCode {
    let ws = match Workspace::open(settings, file) {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let model = match load_model(&ws.root_path, &ws.source, &ws.resolver) {
        Ok(model) => model,
        Err(e) => {
            ws.report(&e, None);
            return ExitCode::FAILURE;
        }
    };

    println!("File: {}", file.display());
    println!("Version: {}", model.version());
    println!();

    if model.files().len() > 1 {
        println!("Imports:");
        for source_file in model.files().iter().skip(1) {
            println!("  - {}", source_file.path);
        }
        println!();
    }

    if !model.concepts().is_empty() {
        println!("Concepts:");
        for concept in model.concepts() {
            let data_type = concept
                .data_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_string());
            println!("  - {} ({} {})", concept.address, concept.purpose, data_type);
        }
        println!();
    }

    if !model.datasources().is_empty() {
        println!("Datasources:");
        for ds in model.datasources() {
            let grain: Vec<String> = ds.grain.iter().map(|c| model.describe(*c)).collect();
            println!(
                "  - {} (address: {}, grain: {})",
                ds.name,
                ds.address,
                grain.join(", ")
            );
        }
        println!();
    }

    let queries = model.file(model.root()).queries.len();
    if queries > 0 {
        println!("Queries: {}", queries);
    } else {
        println!("No queries defined.");
    }

    ExitCode::SUCCESS
}
