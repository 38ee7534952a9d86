use clap::Parser;
use clap_num::maybe_hex;
use itertools::Itertools;
use riscvsim::core::Core;
use riscvsim::loader::load_image;
use riscvsim::memory::Memory;
use riscvsim::scalar::Scalar;
use std::fs::File;
use std::io::{self, BufReader};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Simulate a 32-bit RISC-V processor
///
/// Reads a hexadecimal memory image (standard input by default), runs
/// the program through a speculative out-of-order pipeline until the
/// halt sentinel commits, and prints the low 8 bits of register x10
/// in decimal.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the memory image; standard input when omitted
    input: Option<String>,

    /// Run the in-order scalar interpreter instead of the pipeline
    #[arg(short, long)]
    scalar: bool,

    /// After halt, print the 8-word memory region starting from this
    /// address (use 0x prefix for hexadecimal)
    #[arg(short, long, value_parser=maybe_hex::<u32>)]
    memory: Option<u32>,
}

fn print_memory(memory: &Memory, base: u32) {
    let dump = (0..8)
        .map(|n| {
            let addr = base.wrapping_add(4 * n);
            match memory.peek_word(addr) {
                Some(word) => format!("{addr:x}: {word:08x}"),
                None => format!("{addr:x}: <out of bounds>"),
            }
        })
        .join("\n");
    eprintln!("{dump}");
}

fn run(args: &Args) -> Result<u32, Box<dyn std::error::Error>> {
    let mut memory = Memory::new();
    match &args.input {
        Some(path) => load_image(BufReader::new(File::open(path)?), &mut memory)?,
        None => load_image(io::stdin().lock(), &mut memory)?,
    }

    let (result, memory) = if args.scalar {
        let mut scalar = Scalar::new();
        *scalar.memory_mut() = memory;
        let result = scalar.run()?;
        (result, std::mem::take(scalar.memory_mut()))
    } else {
        let mut core = Core::new();
        *core.memory_mut() = memory;
        let result = core.run()?;
        (result, std::mem::take(core.memory_mut()))
    };

    if let Some(base) = args.memory {
        print_memory(&memory, base);
    }
    Ok(result)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(result) => {
            println!("{result}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
