use std::{
    error::Error,
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::Parser;
use diatom::{disasm, Vm, VmConfig};
use tracing::Level;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Bytecode image
    image: PathBuf,

    /// TOML file with memory and stack sizes
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a listing of the image instead of running it
    #[arg(long)]
    disassemble: bool,

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
    if args.disassemble {
        let image = fs::read(&args.image).map_err(|e| format!("cant open file: {e}"))?;
        let mut out = BufWriter::new(io::stdout().lock());
        for ins in disasm::disassemble(&image) {
            writeln!(out, "{ins}")?;
        }
        out.flush()?;
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => VmConfig::from_path(path)?,
        None => VmConfig::default(),
    };
    tracing::debug!("{config:?}");

    let file = File::open(&args.image).map_err(|e| format!("cant open file: {e}"))?;
    let mut vm = Vm::new(
        &config,
        io::stdin().lock(),
        BufWriter::new(io::stdout().lock()),
    );
    vm.load_from(BufReader::new(file))?;
    vm.run()?;
    Ok(())
}
