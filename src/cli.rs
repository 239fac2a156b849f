// Command-line front end for deltafs chains.
//
// `link` stores a file as a delta against a parent, the way `dln` does.
// The other subcommands read and mutate files through `DeltaFs` so that
// chains stay consistent. Every path is relative to `--root`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};

use crate::config::{self, Options};
use crate::directory::JsonDirectory;
use crate::error::Result;
use crate::fs::DeltaFs;

const DEFAULT_DB: &str = ".deltafs.json";

// ---------------------------------------------------------------------------
// Byte size parsing (supports K, M, G suffixes)
// ---------------------------------------------------------------------------

fn parse_byte_size(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size string".into());
    }
    let (num_part, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1024u64),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1024 * 1024),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1u64),
    };
    let num: u64 = num_part
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: '{s}'"))
}

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Delta-compressed file chains.
#[derive(Parser, Debug)]
#[command(
    name = "deltafs",
    version,
    about = "Store files as deltas against a parent file",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Directory every path is relative to.
    #[arg(long, global = true, default_value = ".", value_hint = ValueHint::DirPath)]
    root: PathBuf,

    /// Chain directory file (default: <root>/.deltafs.json).
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    db: Option<PathBuf>,

    /// Directory holding lock files; must be shared by every process.
    #[arg(long = "lock-dir", global = true, value_hint = ValueHint::DirPath)]
    lock_dir: Option<PathBuf>,

    /// Absolute window size (supports K/M/G suffix).
    #[arg(long = "window-abs", global = true, value_parser = parse_byte_size)]
    window_abs: Option<u64>,

    /// Window size as a fraction of the parent size, in (0, 1].
    #[arg(long = "window-rel", global = true)]
    window_rel: Option<f64>,

    /// Quiet mode (errors only).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Print reports as JSON.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Store INPUT as a delta against SOURCE.
    Link(LinkArgs),
    /// Create TO as a delta of FROM with identical content.
    Ln(LnArgs),
    /// Print logical content.
    Cat(CatArgs),
    /// Write bytes at an offset.
    Write(WriteArgs),
    /// Resize to a logical size.
    Truncate(TruncateArgs),
    /// Remove a file, promoting a child if it is a parent.
    Rm(PathArg),
    /// Rename a file and re-point its chain entries.
    Mv(MvArgs),
    /// Show chain role and sizes.
    Stat(PathArg),
    /// Print build/configuration details.
    Config,
}

#[derive(Args, Debug)]
struct LinkArgs {
    /// Parent file.
    #[arg(value_hint = ValueHint::FilePath)]
    source: PathBuf,

    /// File to store as a delta.
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Write the delta here instead of replacing INPUT.
    #[arg(long, short = 'o', value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Keep INPUT's original content as INPUT.dlnbak.
    #[arg(long, short = 'S')]
    safe: bool,
}

#[derive(Args, Debug)]
struct LnArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    from: PathBuf,
    #[arg(value_hint = ValueHint::FilePath)]
    to: PathBuf,
}

#[derive(Args, Debug)]
struct CatArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    path: PathBuf,

    /// First byte to print.
    #[arg(long, value_parser = parse_byte_size, default_value_t = 0)]
    offset: u64,

    /// Bytes to print (default: to end of file).
    #[arg(long, value_parser = parse_byte_size)]
    length: Option<u64>,
}

#[derive(Args, Debug)]
struct WriteArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    path: PathBuf,

    /// Where to write.
    #[arg(long, value_parser = parse_byte_size)]
    offset: u64,

    /// Bytes to write (default: stdin).
    #[arg(long, value_hint = ValueHint::FilePath)]
    input: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TruncateArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    path: PathBuf,

    /// New logical size (supports K/M/G suffix).
    #[arg(value_parser = parse_byte_size)]
    size: u64,
}

#[derive(Args, Debug)]
struct MvArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    from: PathBuf,
    #[arg(value_hint = ValueHint::FilePath)]
    to: PathBuf,
}

#[derive(Args, Debug)]
struct PathArg {
    #[arg(value_hint = ValueHint::FilePath)]
    path: PathBuf,
}

#[cfg(any(test, feature = "fuzzing"))]
pub fn fuzz_try_parse_args(args: &[String]) {
    let argv: Vec<String> = std::iter::once("deltafs".to_string())
        .chain(args.iter().cloned())
        .collect();
    if let Ok(cli) = Cli::try_parse_from(argv) {
        let _ = build_options(&cli);
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn build_options(cli: &Cli) -> Result<Options> {
    let opts = Options::from_window_args(cli.window_abs, cli.window_rel)?;
    Ok(match &cli.lock_dir {
        Some(dir) => opts.with_lock_dir(dir),
        None => opts,
    })
}

fn open_store(cli: &Cli) -> Result<DeltaFs<JsonDirectory>> {
    let options = build_options(cli)?;
    let db = cli
        .db
        .clone()
        .unwrap_or_else(|| cli.root.join(DEFAULT_DB));
    let directory = JsonDirectory::open(db)?;
    DeltaFs::new(&cli.root, options, directory)
}

fn log_filter(cli: &Cli) -> &'static str {
    if cli.quiet {
        return "error";
    }
    match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn report(cli: &Cli, json: serde_json::Value) {
    if cli.json_output
        && let Ok(text) = serde_json::to_string_pretty(&json)
    {
        eprintln!("{text}");
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_config(cli: &Cli) -> i32 {
    let version = env!("CARGO_PKG_VERSION");
    let adler32 = if cfg!(feature = "adler32") {
        "simd"
    } else {
        "scalar"
    };
    eprintln!("deltafs version {version}");
    eprintln!("ADLER32={adler32}");
    eprintln!("MIN_WINDOW={}", config::MIN_WINDOW);
    eprintln!("MAX_WINDOW={}", config::MAX_WINDOW);
    eprintln!("DEFAULT_WINDOW_FRACTION={}", config::DEFAULT_WINDOW_FRACTION);
    eprintln!("DEFAULT_BUFFER_SIZE={}", config::DEFAULT_BUFFER_SIZE);
    eprintln!("MAX_CHILDREN={}", crate::directory::MAX_CHILDREN);
    match build_options(cli) {
        Ok(opts) => {
            eprintln!("LOCK_DIR={}", opts.lock_dir.display());
            0
        }
        Err(e) => {
            eprintln!("deltafs: {e}");
            1
        }
    }
}

fn cmd_link(cli: &Cli, store: &DeltaFs<JsonDirectory>, args: &LinkArgs) -> Result<()> {
    let size = store.adopt(
        &args.source,
        &args.input,
        args.output.as_deref(),
        args.safe,
    )?;
    let child = args.output.as_deref().unwrap_or(args.input.as_path());
    if !cli.quiet && cli.verbose > 0 {
        eprintln!(
            "deltafs: {} stored against {} ({size} bytes)",
            child.display(),
            args.source.display()
        );
    }
    report(
        cli,
        serde_json::json!({
            "command": "link",
            "parent": args.source,
            "child": child,
            "size": size,
            "stored": std::fs::metadata(store.root().join(store.key(child)?))?.len(),
        }),
    );
    Ok(())
}

fn cmd_cat(store: &DeltaFs<JsonDirectory>, args: &CatArgs) -> Result<()> {
    let size = store.size(&args.path)?;
    let length = args
        .length
        .unwrap_or_else(|| size.saturating_sub(args.offset));
    let length = usize::try_from(length).unwrap_or(usize::MAX);
    let bytes = store.read(&args.path, length, args.offset)?;
    let mut out = io::stdout().lock();
    out.write_all(&bytes)?;
    out.flush()?;
    Ok(())
}

fn cmd_write(cli: &Cli, store: &DeltaFs<JsonDirectory>, args: &WriteArgs) -> Result<()> {
    let mut data = Vec::new();
    match &args.input {
        Some(path) => {
            File::open(path)?.read_to_end(&mut data)?;
        }
        None => {
            io::stdin().lock().read_to_end(&mut data)?;
        }
    }
    let n = store.write(&args.path, &data, args.offset)?;
    report(
        cli,
        serde_json::json!({
            "command": "write",
            "path": args.path,
            "offset": args.offset,
            "written": n,
            "size": store.size(&args.path)?,
        }),
    );
    Ok(())
}

fn cmd_stat(cli: &Cli, store: &DeltaFs<JsonDirectory>, path: &Path) -> Result<()> {
    let st = store.stat(path)?;
    let mut out = io::stdout().lock();
    if cli.json_output {
        writeln!(out, "{}", serde_json::to_string_pretty(&st)?)?;
        return Ok(());
    }
    writeln!(out, "path:     {}", st.path.display())?;
    writeln!(out, "kind:     {}", st.kind)?;
    if let Some(parent) = &st.parent {
        writeln!(out, "parent:   {}", parent.display())?;
    }
    for child in &st.children {
        writeln!(out, "child:    {}", child.display())?;
    }
    writeln!(out, "size:     {}", st.size)?;
    writeln!(out, "stored:   {}", st.stored)?;
    Ok(())
}

fn dispatch(cli: &Cli) -> Result<()> {
    let store = open_store(cli)?;
    match &cli.command {
        Cmd::Link(args) => cmd_link(cli, &store, args),
        Cmd::Ln(args) => {
            let size = store.link(&args.from, &args.to)?;
            report(
                cli,
                serde_json::json!({ "command": "ln", "parent": args.from, "child": args.to, "size": size }),
            );
            Ok(())
        }
        Cmd::Cat(args) => cmd_cat(&store, args),
        Cmd::Write(args) => cmd_write(cli, &store, args),
        Cmd::Truncate(args) => store.truncate(&args.path, args.size),
        Cmd::Rm(arg) => store.unlink(&arg.path),
        Cmd::Mv(args) => store.rename(&args.from, &args.to),
        Cmd::Stat(arg) => cmd_stat(cli, &store, &arg.path),
        Cmd::Config => Ok(()),
    }
}

fn command_name(cmd: &Cmd) -> &'static str {
    match cmd {
        Cmd::Link(_) => "link",
        Cmd::Ln(_) => "ln",
        Cmd::Cat(_) => "cat",
        Cmd::Write(_) => "write",
        Cmd::Truncate(_) => "truncate",
        Cmd::Rm(_) => "rm",
        Cmd::Mv(_) => "mv",
        Cmd::Stat(_) => "stat",
        Cmd::Config => "config",
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run() -> ! {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(&cli)))
        .format_timestamp(None)
        .format_target(false)
        .init();

    if let Cmd::Config = cli.command {
        process::exit(cmd_config(&cli));
    }

    let code = match dispatch(&cli) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("deltafs: {}: {e}", command_name(&cli.command));
            1
        }
    };
    process::exit(code);
}
