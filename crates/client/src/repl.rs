use std::io::{BufRead, Write};
use std::path::PathBuf;

use crate::Engine;

#[derive(Debug, Clone)]
pub struct ReplOptions {
    pub metadata: PathBuf,
    pub config: Option<PathBuf>,
}

/// Output rendering for compiled statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Explain,
    Json,
}

/// Read statements from stdin until `\q`, printing what each compiles to.
///
/// Input is buffered across lines until a line ends with `;`. `\json` and
/// `\explain` switch the output form.
pub fn run_repl(opts: ReplOptions) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::from_files(&opts.metadata, opts.config.as_deref())?;
    eprintln!("fxq REPL (type \\q to quit, \\json or \\explain to switch output)");

    let mut output = Output::Explain;
    let mut buffer = String::new();
    let mut lines = std::io::stdin().lock().lines();
    loop {
        print!("{}", if buffer.is_empty() { "fxq> " } else { "...> " });
        std::io::stdout().flush()?;
        let Some(line) = lines.next().transpose()? else {
            break;
        };
        let raw = line.trim();

        if buffer.is_empty() {
            match raw {
                "" => continue,
                "\\q" => break,
                "\\json" => {
                    output = Output::Json;
                    continue;
                }
                "\\explain" => {
                    output = Output::Explain;
                    continue;
                }
                _ => {}
            }
        }

        buffer.push_str(raw);
        buffer.push('\n');
        if !raw.ends_with(';') {
            continue;
        }
        render(&engine, &buffer, output);
        buffer.clear();
    }
    Ok(())
}

fn render(engine: &Engine, sql: &str, output: Output) {
    let rendered = match output {
        Output::Explain => engine.explain(sql),
        Output::Json => engine.compile(sql).and_then(|statements| {
            serde_json::to_string_pretty(&statements).map_err(Into::into)
        }),
    };
    match rendered {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("error: {e}"),
    }
}
