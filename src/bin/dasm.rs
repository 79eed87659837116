use std::{
    error::Error,
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use diatom::{asm::Output, labels::LabelTable, Assembler, MEMORY_SIZE};
use tracing::Level;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Assembly source file
    source: PathBuf,

    /// Output image file (default: source with a `.dopc` extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pre-defined symbols (repeatable)
    #[arg(short = 'D', long, value_name="KEY1=val", value_parser = diatom::parse_defines::<String, i32>)]
    define: Vec<(String, i32)>,

    /// Output file for the symbol table
    #[arg(long)]
    symbols: Option<PathBuf>,

    /// Also write the expanded (`.dexp`) and resolved (`.dins`) streams
    #[arg(long)]
    intermediate: bool,

    /// Largest image to produce, in bytes
    #[arg(long, default_value_t = MEMORY_SIZE)]
    max_size: u32,

    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`
    #[arg(short, long, default_value_t = Level::INFO)]
    log_level: Level,
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = main_real(args) {
        tracing::error!("{e}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main_real(args: Args) -> Result<(), Box<dyn Error>> {
    let file = File::open(&args.source).map_err(|e| format!("cant open file: {e}"))?;

    let mut asm = Assembler::new().with_max_size(args.max_size);
    for (name, value) in &args.define {
        asm.define(name, *value);
    }

    let out = asm
        .assemble(BufReader::new(file))
        .map_err(|e| format!("{}:{e}", args.source.display()))?;

    let path = args
        .output
        .unwrap_or_else(|| args.source.with_extension("dopc"));
    tracing::trace!("writing image");
    let mut file = create(&path)?;
    file.write_all(&out.image)?;
    file.flush()?;
    tracing::debug!("wrote {} bytes to {}", out.image.len(), path.display());

    if args.intermediate {
        write_intermediate(&path, &out)?;
    }

    if let Some(path) = args.symbols {
        tracing::trace!("writing symbols");
        write_symbols(&path, asm.labels())?;
    }

    Ok(())
}

fn create(path: &Path) -> Result<BufWriter<File>, Box<dyn Error>> {
    let file = File::options()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| format!("cant open file: {e}"))?;
    Ok(BufWriter::new(file))
}

fn write_intermediate(image: &Path, out: &Output) -> Result<(), Box<dyn Error>> {
    for (ext, stream) in [("dexp", &out.expanded), ("dins", &out.resolved)] {
        let path = image.with_extension(ext);
        tracing::trace!("writing {}", path.display());
        let mut file = create(&path)?;
        write!(file, "{stream}")?;
        file.flush()?;
    }
    Ok(())
}

fn write_symbols(path: &Path, labels: &LabelTable) -> Result<(), Box<dyn Error>> {
    let mut file = create(path)?;
    for label in labels.iter() {
        writeln!(file, "{:06X} {}", label.address, label.name)?;
    }
    file.flush()?;
    Ok(())
}
