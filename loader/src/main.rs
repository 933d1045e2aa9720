//! elfcall CLI
//!
//! Loads an ELF64 image, optionally lists its named symbols and invokes an
//! exported function with integer arguments.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use elfcall::elf::{ElfLoader, ElfView};
use elfcall::mmap::MmapMapper;
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "elfcall", version, about = "Load an ELF64 image and call its exported functions")]
struct Cli {
    /// Path to the ELF64 image
    image: PathBuf,

    /// List the named symbols in the image
    #[arg(long)]
    symbols: bool,

    /// List the image's program headers
    #[arg(long)]
    segments: bool,

    /// Name of an exported function to invoke
    #[arg(long)]
    call: Option<String>,

    /// Integer arguments for --call
    #[arg(long, num_args = 0..=6, requires = "call", allow_negative_numbers = true)]
    args: Vec<i64>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(&cli.image)?;
    log::info!("read {} bytes from {}", bytes.len(), cli.image.display());

    let view = ElfView::parse(&bytes)?;

    if cli.segments {
        print_segments(&view);
    }

    if cli.symbols {
        print_symbols(&view)?;
    }

    if let Some(name) = &cli.call {
        let mut loader = ElfLoader::new(view, MmapMapper);
        loader.load()?;
        let result = invoke(&loader, name, &cli.args);
        // Unload regardless of how the invocation went.
        loader.unload()?;
        println!("Returned {}", result?);
    }

    Ok(())
}

fn print_segments(view: &ElfView<'_>) {
    println!("{:>4}  {:>18}  {:>10}  {:>10}  perm", "nr", "vaddr", "filesz", "memsz");
    for (i, phdr) in view.program_headers().iter().enumerate() {
        if !phdr.is_loadable() {
            continue;
        }
        let (vaddr, filesz, memsz) = (phdr.p_vaddr, phdr.p_filesz, phdr.p_memsz);
        println!("{i:>4}  {vaddr:#18x}  {filesz:>10}  {memsz:>10}  {}", phdr.flags());
    }
}

fn print_symbols(view: &ElfView<'_>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{:>18}  {:>8}  {:<7}  {:<6}  name", "value", "size", "bind", "type");
    for sym in view.symbols() {
        if sym.st_name == 0 {
            continue;
        }
        let name = view.symbol_name(sym)?;
        let bind = match sym.binding() {
            elfcall_common::STB_LOCAL => "LOCAL",
            elfcall_common::STB_GLOBAL => "GLOBAL",
            elfcall_common::STB_WEAK => "WEAK",
            _ => "?",
        };
        let kind = match sym.symbol_type() {
            elfcall_common::STT_NOTYPE => "NOTYPE",
            elfcall_common::STT_OBJECT => "OBJECT",
            elfcall_common::STT_FUNC => "FUNC",
            _ => "?",
        };
        let (value, size) = (sym.st_value, sym.st_size);
        println!("{value:#18x}  {size:>8}  {bind:<7}  {kind:<6}  {name}");
    }
    Ok(())
}

/// Invoke `name` as `extern "C" fn(i64, ...) -> i64` with up to six integer
/// arguments. The signature is the caller's claim; a mismatch is undefined
/// behavior, exactly as with any foreign function.
fn invoke<M: elfcall::RegionMapper>(
    loader: &ElfLoader<'_, M>,
    name: &str,
    args: &[i64],
) -> Result<i64, Box<dyn std::error::Error>> {
    let mut trace = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            trace.push_str(", ");
        }
        let _ = write!(trace, "{arg}");
    }
    println!("Calling {name}({trace})...");

    let result = unsafe {
        match *args {
            [] => loader.symbol::<extern "C" fn() -> i64>(name)?(),
            [a] => loader.symbol::<extern "C" fn(i64) -> i64>(name)?(a),
            [a, b] => loader.symbol::<extern "C" fn(i64, i64) -> i64>(name)?(a, b),
            [a, b, c] => loader.symbol::<extern "C" fn(i64, i64, i64) -> i64>(name)?(a, b, c),
            [a, b, c, d] => {
                loader.symbol::<extern "C" fn(i64, i64, i64, i64) -> i64>(name)?(a, b, c, d)
            }
            [a, b, c, d, e] => loader
                .symbol::<extern "C" fn(i64, i64, i64, i64, i64) -> i64>(name)?(
                a, b, c, d, e
            ),
            [a, b, c, d, e, f] => loader
                .symbol::<extern "C" fn(i64, i64, i64, i64, i64, i64) -> i64>(name)?(
                a, b, c, d, e, f,
            ),
            _ => return Err("at most six integer arguments are supported".into()),
        }
    };
    Ok(result)
}
