//! corpus - command line front end for the opencorpus pipeline.
//!
//! ## Usage
//!
//! ```sh
//! corpus deposit <file>
//! corpus retrieve <id> [--output <file>]
//! corpus efface <id>
//! corpus transform <id> [--input <file>]... [--output <file>]
//! corpus cleanup <id> [--cache]
//! corpus unique
//! corpus resolve <name> --dictionary <file>
//! ```
//!
//! ## Configuration
//!
//! `--config <path>`, else `$OPENCORPUS_CONFIG`, else
//! `<config dir>/opencorpus/config.json` when present, else built-in
//! defaults.

use opencorpus::{
    ChildHandle, Config, ContentIdentifier, Dictionary, JsonDictionary, ObjectStore, Pipeline,
};
use std::fs::File;
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

// =============================================================================
// Constants
// =============================================================================

/// Environment variable naming a configuration file.
const CONFIG_ENV: &str = "OPENCORPUS_CONFIG";

/// Returns the per-user configuration file location, if any.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("opencorpus").join("config.json"))
}

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug)]
enum Command {
    Deposit {
        file: PathBuf,
    },
    Retrieve {
        id: String,
        output: Option<PathBuf>,
    },
    Efface {
        id: String,
    },
    Transform {
        id: String,
        inputs: Vec<PathBuf>,
        output: Option<PathBuf>,
    },
    Cleanup {
        id: String,
        cache: bool,
    },
    Unique,
    Resolve {
        name: String,
        dictionary: PathBuf,
    },
    Version,
    Help,
}

#[derive(Debug)]
struct Invocation {
    config: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Result<Invocation, String> {
    let mut config = None;
    let mut args = Vec::new();

    let mut raw = std::env::args().skip(1);
    while let Some(arg) = raw.next() {
        if arg == "--config" || arg == "-c" {
            let path = raw.next().ok_or("--config requires a path")?;
            config = Some(PathBuf::from(path));
        } else {
            args.push(arg);
        }
    }

    let command = parse_command(&args)?;
    Ok(Invocation { config, command })
}

fn parse_command(args: &[String]) -> Result<Command, String> {
    let Some(name) = args.first() else {
        return Ok(Command::Help);
    };

    let positional = |what: &str| -> Result<String, String> {
        args.get(1)
            .filter(|a| !a.starts_with('-'))
            .cloned()
            .ok_or_else(|| format!("{name} requires <{what}>"))
    };

    match name.as_str() {
        "deposit" => Ok(Command::Deposit {
            file: PathBuf::from(positional("file")?),
        }),
        "retrieve" => Ok(Command::Retrieve {
            id: positional("id")?,
            output: option_value(args, "--output", "-o")?.map(PathBuf::from),
        }),
        "efface" => Ok(Command::Efface {
            id: positional("id")?,
        }),
        "transform" => {
            let id = positional("id")?;
            let mut inputs = Vec::new();
            let mut i = 2;
            while i < args.len() {
                if args[i] == "--input" || args[i] == "-i" {
                    let path = args.get(i + 1).ok_or("--input requires a path")?;
                    inputs.push(PathBuf::from(path));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            Ok(Command::Transform {
                id,
                inputs,
                output: option_value(args, "--output", "-o")?.map(PathBuf::from),
            })
        }
        "cleanup" => Ok(Command::Cleanup {
            id: positional("id")?,
            cache: args.iter().any(|a| a == "--cache"),
        }),
        "unique" => Ok(Command::Unique),
        "resolve" => Ok(Command::Resolve {
            name: positional("name")?,
            dictionary: option_value(args, "--dictionary", "-d")?
                .map(PathBuf::from)
                .ok_or("resolve requires --dictionary <file>")?,
        }),
        "version" | "--version" | "-v" => Ok(Command::Version),
        "help" | "--help" | "-h" => Ok(Command::Help),
        unknown => Err(format!("unknown command: {unknown}")),
    }
}

fn option_value(args: &[String], long: &str, short: &str) -> Result<Option<String>, String> {
    match args.iter().position(|a| a == long || a == short) {
        Some(i) => args
            .get(i + 1)
            .cloned()
            .map(Some)
            .ok_or_else(|| format!("{long} requires a value")),
        None => Ok(None),
    }
}

// =============================================================================
// Setup
// =============================================================================

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(explicit: Option<PathBuf>) -> Result<Config, String> {
    let path = explicit
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .or_else(|| default_config_path().filter(|p| p.exists()));

    match path {
        Some(path) => Config::from_file(&path).map_err(|e| e.to_string()),
        None => Ok(Config::default()),
    }
}

fn parse_id(id: &str) -> Result<ContentIdentifier, String> {
    id.parse()
        .map_err(|e: opencorpus::Error| format!("invalid identifier {id:?}: {e}"))
}

fn open_output(path: Option<&Path>) -> Result<Option<File>, String> {
    path.map(|p| File::create(p).map_err(|e| format!("cannot create {}: {e}", p.display())))
        .transpose()
}

/// Waits on a dispatched child and turns a non-zero exit into an error.
fn reap(child: ChildHandle) -> Result<(), String> {
    let program = child.program().display().to_string();
    let status = child.wait().map_err(|e| e.to_string())?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("{program} exited with {status}"))
    }
}

// =============================================================================
// Command Implementations
// =============================================================================

fn cmd_deposit(config: &Config, file: PathBuf) -> Result<(), String> {
    let mut reader =
        File::open(&file).map_err(|e| format!("cannot open {}: {e}", file.display()))?;
    let id = ContentIdentifier::of_reader(&mut reader)
        .map_err(|e| format!("cannot read {}: {e}", file.display()))?;

    let input = File::open(&file).map_err(|e| format!("cannot open {}: {e}", file.display()))?;
    let store = ObjectStore::new(config).map_err(|e| e.to_string())?;
    let log = io::stderr();

    let child = store
        .deposit(&id, log.as_fd(), input.as_fd())
        .map_err(|e| e.to_string())?;
    if let Err(e) = reap(child) {
        // Free the key so the deposit can be retried.
        let _ = store.efface(&id);
        return Err(e);
    }

    println!("{id}");
    Ok(())
}

fn cmd_retrieve(config: &Config, id: String, output: Option<PathBuf>) -> Result<(), String> {
    let id = parse_id(&id)?;
    let store = ObjectStore::new(config).map_err(|e| e.to_string())?;
    let file = open_output(output.as_deref())?;
    let stdout = io::stdout();
    let out: BorrowedFd<'_> = match &file {
        Some(f) => f.as_fd(),
        None => stdout.as_fd(),
    };
    let log = io::stderr();

    let child = store
        .retrieve(&id, log.as_fd(), out)
        .map_err(|e| e.to_string())?;
    reap(child)
}

fn cmd_efface(config: &Config, id: String) -> Result<(), String> {
    let id = parse_id(&id)?;
    let store = ObjectStore::new(config).map_err(|e| e.to_string())?;
    store.efface(&id).map_err(|e| e.to_string())
}

fn cmd_transform(
    config: &Config,
    id: String,
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
) -> Result<(), String> {
    let id = parse_id(&id)?;
    let pipeline = Pipeline::new(config);

    let files = inputs
        .iter()
        .map(|p| File::open(p).map_err(|e| format!("cannot open {}: {e}", p.display())))
        .collect::<Result<Vec<_>, _>>()?;
    let fds: Vec<BorrowedFd<'_>> = files.iter().map(|f| f.as_fd()).collect();

    let file = open_output(output.as_deref())?;
    let stdout = io::stdout();
    let out: BorrowedFd<'_> = match &file {
        Some(f) => f.as_fd(),
        None => stdout.as_fd(),
    };
    let log = io::stderr();

    let child = pipeline
        .transform(&id, log.as_fd(), out, &fds)
        .map_err(|e| e.to_string())?;
    let result = reap(child);

    // Temp space is reclaimed whether or not the stage succeeded.
    let cleanup = pipeline.cleanup(&id, false).map_err(|e| e.to_string());
    result.and(cleanup)
}

fn cmd_cleanup(config: &Config, id: String, cache: bool) -> Result<(), String> {
    let id = parse_id(&id)?;
    Pipeline::new(config)
        .cleanup(&id, cache)
        .map_err(|e| e.to_string())
}

fn cmd_unique() -> Result<(), String> {
    let id = opencorpus::unique::generate().map_err(|e| e.to_string())?;
    println!("{id}");
    Ok(())
}

fn cmd_resolve(name: String, dictionary: PathBuf) -> Result<(), String> {
    let dict = JsonDictionary::open(&dictionary).map_err(|e| e.to_string())?;
    let id = dict.resolve(&name).map_err(|e| e.to_string())?;
    println!("{id}");
    Ok(())
}

fn cmd_version() {
    println!("corpus version {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_help() {
    println!(
        r#"corpus - sandboxed transformations over a content-addressed store

USAGE:
    corpus [--config <path>] <command> [options]

COMMANDS:
    deposit <file>                       Store a file, print its identifier
    retrieve <id> [--output <file>]      Write an object to stdout or a file
    efface <id>                          Remove an object
    transform <id> [--input <file>]...   Run the identifier's transformation
              [--output <file>]
    cleanup <id> [--cache]               Remove temp (and cache) scratch trees
    unique                               Print a fresh ephemeral identifier
    resolve <name> --dictionary <file>   Look a name up in a dictionary
    version                              Show version info
    help                                 Show this help

ENVIRONMENT:
    OPENCORPUS_CONFIG    Configuration file (JSON)
    RUST_LOG             Log filter (default: warn)
"#
    );
}

fn main() -> ExitCode {
    init_logging();

    let invocation = match parse_args() {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("error: {}", e);
            cmd_help();
            return ExitCode::FAILURE;
        }
    };

    let config = match load_config(invocation.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match invocation.command {
        Command::Deposit { file } => cmd_deposit(&config, file),
        Command::Retrieve { id, output } => cmd_retrieve(&config, id, output),
        Command::Efface { id } => cmd_efface(&config, id),
        Command::Transform { id, inputs, output } => cmd_transform(&config, id, inputs, output),
        Command::Cleanup { id, cache } => cmd_cleanup(&config, id, cache),
        Command::Unique => cmd_unique(),
        Command::Resolve { name, dictionary } => cmd_resolve(name, dictionary),
        Command::Version => {
            cmd_version();
            Ok(())
        }
        Command::Help => {
            cmd_help();
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
