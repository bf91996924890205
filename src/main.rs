use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser};
use log::{LevelFilter, info};
use simple_logger::SimpleLogger;

#[derive(Parser)]
#[command(version, about = "Compile a small Go-like language to x86-64 assembly", long_about = None)]
struct Args {
  /// Source file; `-` reads standard input.
  #[arg(default_value = "-")]
  input: String,
  /// Write assembly here instead of standard output.
  #[arg(short, long)]
  output: Option<PathBuf>,
  /// Log compiler stages (-v debug, -vv trace).
  #[arg(short, long, action = ArgAction::Count)]
  verbose: u8,
}

fn read_source(input: &str) -> io::Result<String> {
  if input == "-" {
    let mut source = String::new();
    io::stdin().read_to_string(&mut source)?;
    Ok(source)
  } else {
    fs::read_to_string(input)
  }
}

fn main() {
  let args = Args::parse();

  let level = match args.verbose {
    0 => LevelFilter::Warn,
    1 => LevelFilter::Debug,
    _ => LevelFilter::Trace,
  };
  if let Err(err) = SimpleLogger::new().with_level(level).env().init() {
    eprintln!("failed to initialise logging: {err}");
  }

  let source = match read_source(&args.input) {
    Ok(source) => source,
    Err(err) => {
      eprintln!("cannot read {}: {err}", args.input);
      process::exit(1);
    }
  };

  let asm = match rgocc::generate_assembly(&source) {
    Ok(asm) => asm,
    Err(err) => {
      eprintln!("{err}");
      process::exit(1);
    }
  };

  match &args.output {
    Some(path) => {
      if let Err(err) = fs::write(path, &asm) {
        eprintln!("cannot write {}: {err}", path.display());
        process::exit(1);
      }
      info!("wrote {}", path.display());
    }
    None => print!("{asm}"),
  }
}
