//! Cubist CLI - validate cube definitions and compile queries to SQL
//!
//! Usage:
//!   cubist validate <dir>
//!   cubist list <dir>
//!   cubist compile <dir> --query <file|json> [--dialect <dialect>] [--output <format>]
//!   cubist match <dir> --query <file|json>
//!
//! Examples:
//!   cubist compile tests/fixtures --query '{"measures": ["TaxiTrips.tripCount"]}'
//!   cubist match tests/fixtures --query '{"measures": ["TaxiTrips.tripCount"], "dimensions": ["TaxiTrips.pickupBorough"]}'

use clap::{Parser, Subcommand, ValueEnum};
use cubist::preagg::candidates;
use cubist::query::{compile, CompileOptions, QueryRequest};
use cubist::schema::{load, Catalog, DirectorySource, SchemaSource};
use cubist::sql::Dialect;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cubist")]
#[command(about = "Cubist - a semantic-layer query compiler and pre-aggregation engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the cube definitions in a directory
    Validate {
        /// Directory of .json cube files
        dir: PathBuf,
    },

    /// List cubes, members and pre-aggregations
    List {
        /// Directory of .json cube files
        dir: PathBuf,
    },

    /// Compile a query to SQL
    Compile {
        /// Directory of .json cube files
        dir: PathBuf,

        /// Query as inline JSON or a path to a JSON file
        #[arg(short, long)]
        query: String,

        /// SQL dialect to generate
        #[arg(short, long, default_value = "duckdb")]
        dialect: DialectArg,

        /// Output format
        #[arg(short, long, default_value = "sql")]
        output: OutputFormat,
    },

    /// Report which pre-aggregation would serve a query
    Match {
        /// Directory of .json cube files
        dir: PathBuf,

        /// Query as inline JSON or a path to a JSON file
        #[arg(short, long)]
        query: String,
    },
}

#[derive(Clone, ValueEnum)]
enum DialectArg {
    Duckdb,
    Postgres,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Duckdb => Dialect::DuckDb,
            DialectArg::Postgres => Dialect::Postgres,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Output SQL only
    Sql,
    /// Output SQL with columns and warnings as comments
    Verbose,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { dir } => cmd_validate(&dir),
        Commands::List { dir } => cmd_list(&dir),
        Commands::Compile {
            dir,
            query,
            dialect,
            output,
        } => cmd_compile(&dir, &query, dialect, output),
        Commands::Match { dir, query } => cmd_match(&dir, &query),
    }
}

fn load_catalog(dir: &Path) -> Result<Catalog, ExitCode> {
    let source = DirectorySource::new(dir);
    let loaded = source.read().and_then(|definitions| load(&definitions));
    loaded.map_err(|e| {
        eprintln!("{e}");
        ExitCode::FAILURE
    })
}

fn read_query(query: &str) -> Result<QueryRequest, ExitCode> {
    let text = if query.trim_start().starts_with('{') {
        query.to_string()
    } else {
        fs::read_to_string(query).map_err(|e| {
            eprintln!("Error reading query '{query}': {e}");
            ExitCode::FAILURE
        })?
    };
    serde_json::from_str(&text).map_err(|e| {
        eprintln!("Invalid query: {e}");
        ExitCode::FAILURE
    })
}

fn cmd_validate(dir: &Path) -> ExitCode {
    match load_catalog(dir) {
        Ok(catalog) => {
            println!(
                "OK: {} is valid ({} cubes, {} pre-aggregations)",
                dir.display(),
                catalog.cubes().len(),
                catalog.pre_aggregations().count()
            );
            ExitCode::SUCCESS
        }
        Err(code) => code,
    }
}

fn cmd_list(dir: &Path) -> ExitCode {
    let catalog = match load_catalog(dir) {
        Ok(c) => c,
        Err(code) => return code,
    };

    for cube in catalog.cubes() {
        println!("{}", cube.name);

        if !cube.dimensions.is_empty() {
            println!("  Dimensions:");
            for dim in &cube.dimensions {
                let pk = if dim.primary_key { ", primary key" } else { "" };
                println!("    - {} ({}{})", dim.name, dim.dimension_type.as_str(), pk);
            }
        }

        if !cube.measures.is_empty() {
            println!("  Measures:");
            for measure in &cube.measures {
                println!("    - {} ({})", measure.name, measure.aggregation.as_str());
            }
        }

        if !cube.joins.is_empty() {
            println!("  Joins:");
            for join in &cube.joins {
                let target = &catalog.cube_by_id(join.target).name;
                println!(
                    "    - {} -> {} ({})",
                    join.instance_name(target),
                    target,
                    join.relationship.as_str()
                );
            }
        }

        if !cube.pre_aggregations.is_empty() {
            println!("  Pre-aggregations:");
            for spec in &cube.pre_aggregations {
                let grain = spec
                    .granularity
                    .map(|g| format!(", {g}"))
                    .unwrap_or_default();
                println!(
                    "    - {} ({} measures, {} dimensions{})",
                    spec.name,
                    spec.measures.len(),
                    spec.dimensions.len(),
                    grain
                );
            }
        }
        println!();
    }

    ExitCode::SUCCESS
}

fn cmd_compile(dir: &Path, query: &str, dialect: DialectArg, output: OutputFormat) -> ExitCode {
    let catalog = match load_catalog(dir) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let request = match read_query(query) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let options = CompileOptions::default().with_dialect(dialect.into());
    match compile(&catalog, &request, &options) {
        Ok(compiled) => {
            match output {
                OutputFormat::Sql => {
                    println!("{}", compiled.sql);
                }
                OutputFormat::Verbose => {
                    println!("-- Cubist Compiled SQL");
                    println!("-- Schema: {}", dir.display());
                    println!("-- Dialect: {:?}", compiled.dialect);
                    for column in &compiled.columns {
                        println!("-- Column: {} <- {}", column.alias, column.member);
                    }
                    for warning in &compiled.fanout_warnings {
                        println!("-- Warning: {warning}");
                    }
                    println!();
                    println!("{}", compiled.sql);
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Compilation error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_match(dir: &Path, query: &str) -> ExitCode {
    let catalog = match load_catalog(dir) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let request = match read_query(query) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let compiled = match compile(&catalog, &request, &CompileOptions::default()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Compilation error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let found = candidates(&catalog, &compiled);
    match found.first() {
        Some(best) => {
            println!("Match: {}", best.key);
            for other in &found[1..] {
                println!(
                    "  also: {} ({} unused dimensions)",
                    other.key, other.extra_dimensions
                );
            }
        }
        None => println!("No pre-aggregation matches; the query runs against source tables."),
    }
    ExitCode::SUCCESS
}
