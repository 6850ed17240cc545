//! Runs JSON-encoded statement scripts against an in-memory database.
//!
//! A script is a JSON array of statements (see `mirage_core::ast`). All
//! statements run in one session, so `begin`/`commit`/`rollback` work as
//! they would over a connection.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use mirage_core::ast::Statement;
use mirage_core::{Database, DbConfig, QueryResult};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the script runner.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Script files, run in order against the same database
    #[arg(required = true)]
    scripts: Vec<PathBuf>,

    /// Print the plan of every query instead of running it
    #[arg(long)]
    explain: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Keep running after a failed statement
    #[arg(long)]
    keep_going: bool,

    /// Row cap for queries without LIMIT
    #[arg(long)]
    default_limit: Option<usize>,

    /// Expression cache capacity (0 disables the cache)
    #[arg(long, default_value_t = 512)]
    cache_capacity: usize,

    /// Leave entropy estimates out of plans
    #[arg(long)]
    no_entropy: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let db = Database::with_config(DbConfig {
        expression_cache_capacity: args.cache_capacity,
        default_limit: args.default_limit,
        explain_entropy: !args.no_entropy,
        ..Default::default()
    });
    let mut session = db.session();
    let mut failures = 0;

    for path in &args.scripts {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let statements: Vec<Statement> = serde_json::from_str(&text)
            .with_context(|| format!("{} is not a statement script", path.display()))?;
        tracing::info!(script = %path.display(), statements = statements.len(), "running script");

        for (i, statement) in statements.into_iter().enumerate() {
            let statement = match statement {
                Statement::Select(query) if args.explain => {
                    Statement::Explain(Box::new(Statement::Select(query)))
                }
                other => other,
            };
            match session.execute(&statement) {
                Ok(result) => print_result(&result, args.json)?,
                Err(e) if args.keep_going => {
                    failures += 1;
                    eprintln!("{}:{}: ERROR: {}", path.display(), i + 1, e);
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("statement {} of {} failed", i + 1, path.display())
                    })
                }
            }
        }
    }

    if failures > 0 {
        bail!("{} statement(s) failed", failures);
    }
    Ok(())
}

fn print_result(result: &QueryResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    if result.columns.is_empty() {
        println!("{} {}", result.command, result.row_count);
        return Ok(());
    }

    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect())
        .collect();
    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.name.len()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let header: Vec<String> = result
        .columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!("{:<w$}", c.name, w = *w))
        .collect();
    println!("{}", header.join(" | "));
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("{}", rule.join("-+-"));
    for row in &cells {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{:<w$}", cell, w = *w))
            .collect();
        println!("{}", line.join(" | "));
    }
    match result.row_count {
        1 => println!("(1 row)\n"),
        n => println!("({} rows)\n", n),
    }
    Ok(())
}
