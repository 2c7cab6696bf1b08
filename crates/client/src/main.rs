use std::path::PathBuf;

use fxq_client::repl::{run_repl, ReplOptions};
use fxq_client::Engine;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let Some(command) = args.first().map(String::as_str) else {
        print_usage();
        return Ok(());
    };
    match command {
        "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        "repl" => {
            let opts = parse_opts(&args[1..], false)?;
            run_repl(ReplOptions {
                metadata: opts.metadata,
                config: opts.config,
            })
        }
        "compile" | "explain" => {
            let opts = parse_opts(&args[1..], true)?;
            let engine = Engine::from_files(&opts.metadata, opts.config.as_deref())?;
            let sql = opts.sql.unwrap_or_default();
            if command == "compile" {
                let compiled = engine.compile(&sql)?;
                println!("{}", serde_json::to_string_pretty(&compiled)?);
            } else {
                println!("{}", engine.explain(&sql)?);
            }
            Ok(())
        }
        other => Err(format!("unknown command: {other}").into()),
    }
}

#[derive(Debug, Clone)]
struct Opts {
    metadata: PathBuf,
    config: Option<PathBuf>,
    sql: Option<String>,
}

fn parse_opts(args: &[String], needs_sql: bool) -> Result<Opts, Box<dyn std::error::Error>> {
    let mut metadata = None;
    let mut config = None;
    let mut sql = None;

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--metadata" => {
                i += 1;
                metadata = Some(PathBuf::from(
                    args.get(i).ok_or("missing value for --metadata")?,
                ));
            }
            "--config" => {
                i += 1;
                config = Some(PathBuf::from(
                    args.get(i).ok_or("missing value for --config")?,
                ));
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown argument: {other}").into());
            }
            other => {
                if !needs_sql || sql.is_some() {
                    return Err(format!("unexpected argument: {other}").into());
                }
                sql = Some(other.to_string());
            }
        }
        i += 1;
    }

    if needs_sql && sql.is_none() {
        return Err("missing SQL text".into());
    }
    Ok(Opts {
        metadata: metadata.ok_or("missing --metadata")?,
        config,
        sql,
    })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  fxq compile --metadata PATH [--config PATH] \"<SQL>\"");
    eprintln!("  fxq explain --metadata PATH [--config PATH] \"<SQL>\"");
    eprintln!("  fxq repl --metadata PATH [--config PATH]");
}
