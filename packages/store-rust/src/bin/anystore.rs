//! `anystore` command line: get, put, pop, delete, list, inspect and copy keys
//! of any store.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anystore::io::smart_copy;
use anystore::mirror::{mirror, MirrorOptions};
use anystore::store::WriteOptions;
use anystore::{KeyFilter, Mode, Result, Store, StoreConfig, Value};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Read and write keys of a store addressed by URI.
#[derive(Parser, Debug)]
#[command(name = "anystore", version, about, long_about = None)]
struct Cli {
    #[clap(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Store URI (path, memory://, sqlite:///..., s3://..., ...).
    #[arg(global = true, long, env = "ANYSTORE_URI")]
    uri: Option<String>,

    /// JSON file with a full store configuration; flags override it.
    #[arg(global = true, long, env = "ANYSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Serialization mode: raw, json, pickle or auto.
    #[arg(global = true, long, env = "ANYSTORE_SERIALIZATION_MODE")]
    serialization_mode: Option<Mode>,

    /// Fail when a key does not exist.
    #[arg(global = true, long, env = "ANYSTORE_RAISE_ON_NONEXIST")]
    raise_on_nonexist: Option<bool>,

    /// Default TTL in seconds for writes (0 = never expire).
    #[arg(global = true, long, env = "ANYSTORE_DEFAULT_TTL")]
    default_ttl: Option<u64>,

    /// Log filter, e.g. `info` or `anystore=debug`.
    #[arg(global = true, long, env = "ANYSTORE_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(global = true, long, env = "ANYSTORE_LOG_JSON", default_value_t = false)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value of a key.
    Get { key: String },
    /// Store a value (read from stdin when omitted).
    Put {
        key: String,
        value: Option<String>,
        /// Expiry in seconds for this write.
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Print the value of a key and remove it.
    Pop { key: String },
    /// Remove a key.
    Delete { key: String },
    /// List keys.
    Keys(FilterArgs),
    /// Print size and timestamps of a key as JSON.
    Info { key: String },
    /// Copy bytes from one location to another (`-` is stdin/stdout).
    Io {
        #[arg(short, long, default_value = "-")]
        input: String,
        #[arg(short, long, default_value = "-")]
        output: String,
    },
    /// Copy keys of the store into another store.
    Mirror {
        /// Target store URI.
        #[arg(short, long)]
        target: String,
        #[clap(flatten)]
        filter: FilterArgs,
        /// Replace keys that already exist in the target.
        #[arg(long, default_value_t = false)]
        overwrite: bool,
        /// Copy threads (0 = one per CPU).
        #[arg(long, default_value_t = 0)]
        workers: usize,
    },
}

#[derive(Args, Debug)]
struct FilterArgs {
    #[arg(long)]
    prefix: Option<String>,
    #[arg(long)]
    exclude_prefix: Option<String>,
    #[arg(long)]
    glob: Option<String>,
}

impl FilterArgs {
    fn filter(&self) -> Result<KeyFilter> {
        KeyFilter::from_parts(
            self.prefix.as_deref(),
            self.exclude_prefix.as_deref(),
            self.glob.as_deref(),
        )
    }
}

impl GlobalOpts {
    fn store_config(&self) -> Result<StoreConfig> {
        let mut config = match &self.config {
            Some(path) => StoreConfig::from_json_file(path)?,
            None => StoreConfig::default(),
        };
        if let Some(uri) = &self.uri {
            config.uri.clone_from(uri);
        }
        if let Some(mode) = self.serialization_mode {
            config.serialization_mode = mode;
        }
        if let Some(raise) = self.raise_on_nonexist {
            config.raise_on_nonexist = raise;
        }
        if let Some(ttl) = self.default_ttl {
            config.default_ttl = ttl;
        }
        Ok(config)
    }
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_value(out: &mut impl Write, value: &Value) -> io::Result<()> {
    match value {
        Value::Null => Ok(()),
        Value::String(s) => writeln!(out, "{s}"),
        Value::Bytes(b) => out.write_all(b),
        other => match other.to_json() {
            Some(json) => writeln!(out, "{json}"),
            None => writeln!(out, "{other:?}"),
        },
    }
}

/// Builds the value to store from input bytes. Raw stores keep the bytes
/// as they are; other modes store valid UTF-8 as text.
fn input_value(data: Vec<u8>, mode: Mode) -> Value {
    if mode == Mode::Raw {
        return Value::Bytes(data);
    }
    match String::from_utf8(data) {
        Ok(text) => Value::String(text),
        Err(e) => Value::Bytes(e.into_bytes()),
    }
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut data = Vec::new();
    io::stdin().read_to_end(&mut data)?;
    Ok(data)
}

fn run(cli: Cli) -> Result<()> {
    if let Command::Io { input, output } = &cli.command {
        let copied = smart_copy(input, output)?;
        tracing::info!(input = %input, output = %output, bytes = copied, "copied");
        return Ok(());
    }

    let store = Store::new(cli.global.store_config()?)?;
    let mut out = io::stdout().lock();
    match cli.command {
        Command::Get { key } => print_value(&mut out, &store.get(&key)?)?,
        Command::Put { key, value, ttl } => {
            let data = match value {
                Some(text) => text.into_bytes(),
                None => read_stdin()?,
            };
            let value = input_value(data, store.config().serialization_mode);
            let options = WriteOptions {
                ttl: ttl.map(Duration::from_secs),
                mode: None,
            };
            store.put_with(&key, &value, &options)?;
        }
        Command::Pop { key } => print_value(&mut out, &store.pop(&key)?)?,
        Command::Delete { key } => store.delete(&key)?,
        Command::Keys(filter) => {
            for key in store.iterate_keys(&filter.filter()?)? {
                writeln!(out, "{}", key?)?;
            }
        }
        Command::Info { key } => {
            let stats = store.info(&key)?;
            let json = serde_json::to_string(&stats)
                .map_err(|e| anystore::StoreError::serialization("json", e))?;
            writeln!(out, "{json}")?;
        }
        Command::Mirror {
            target,
            filter,
            overwrite,
            workers,
        } => {
            let target = Store::from_uri(&target)?;
            let options = MirrorOptions {
                filter: filter.filter()?,
                overwrite,
                workers,
            };
            let report = mirror(&store, &target, &options)?;
            writeln!(out, "mirrored {} keys, skipped {}", report.mirrored, report.skipped)?;
        }
        Command::Io { .. } => {}
    }
    out.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.global.log_level, cli.global.log_json);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", e.kind());
            ExitCode::FAILURE
        }
    }
}
