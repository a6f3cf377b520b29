
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rand::prelude::*;

use compsimp::*;
use compsimp::vm;

/// Synthesize a branch-free cmov transform for a single instruction.
///
/// Operands are register names (rax, r9d, cl, ...) or immediates ($5).
/// Example:
///
///   cs-transform --cases data/cmov_transform_cases.csv ADD64rr rax rbx
///
#[derive(Parser)]
#[command(verbatim_doc_comment)]
pub struct Args {
    /// Catalog mnemonic of the instruction (ie. ADD64rr)
    insn: String,

    /// Instruction operands
    #[arg(allow_hyphen_values = true)]
    ops: Vec<Operand>,

    /// Path to the case catalog
    #[arg(long, default_value = CaseCatalog::DEFAULT_PATH)]
    cases: PathBuf,

    /// A comma-separated list of scratch registers
    #[arg(long, value_delimiter = ',')]
    scratch: Vec<Gpr>,

    /// Register holding the trigger flag
    #[arg(long)]
    flag_reg: Option<Gpr>,

    /// Register used for immediate loads
    #[arg(long)]
    temp_reg: Option<Gpr>,

    /// Restore the flags of the original instruction through this register
    #[arg(long)]
    preserve_flags: Option<Gpr>,

    /// Assemble and disassemble the transform
    #[arg(long)]
    disas: bool,

    /// Print the expected instruction delta
    #[arg(long)]
    histogram: bool,

    /// Compare against the original instruction on N random inputs
    #[arg(long, value_name = "N")]
    check: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> SynthConfig {
        let mut cfg = SynthConfig::new()
            .preserve_flags(self.preserve_flags);
        if !self.scratch.is_empty() {
            cfg = cfg.scratch(self.scratch.clone());
        }
        if let Some(reg) = self.flag_reg {
            cfg = cfg.flag_reg(reg);
        }
        if let Some(reg) = self.temp_reg {
            cfg = cfg.temp_reg(reg);
        }
        cfg
    }
}

/// Returns false if a check found a divergence.
fn run(arg: &Args) -> CsResult<bool> {
    let catalog = CaseCatalog::from_path(&arg.cases)?;
    let synth = Synthesizer::new(catalog, arg.config())?;

    let plan = match synth.plan(&arg.insn, &arg.ops)? {
        Some(plan) => plan,
        None => {
            println!("[*] No cases for {}, instruction is unmodified", arg.insn);
            return Ok(true);
        },
    };
    let transform = plan.emit();

    println!("[*] {}: {} case(s), nesting depth {}, {} op(s)",
        transform.target(), plan.levels(), plan.nesting_depth(),
        transform.len());
    print!("{}", transform);

    if arg.histogram {
        println!("[*] Expected delta: {}", plan.expected_delta());
    }

    if arg.disas {
        let code = transform.assemble()?;
        println!("[*] Assembled {} byte(s)", code.len());
        for line in disas(&code, 0) {
            println!("  {}", line);
        }
    }

    if let Some(iters) = arg.check {
        let cases = synth.catalog().load(&arg.insn, &arg.ops)?;
        let cfg = synth.config();
        let mut rng = thread_rng();
        let res = vm::differential(cfg, &cases, &transform, &mut rng, iters,
            cfg.preserve_flags.is_some())?;
        if res.is_empty() {
            println!("[*] No divergence over {} input(s)", iters);
        } else {
            for (init, d) in res.iter() {
                println!("[!] {:x?}", d);
                println!("    initial state: {:x?}", init.gpr);
            }
            println!("[!] {} divergence(s) over {} input(s)", res.len(), iters);
            return Ok(false);
        }
    }
    Ok(true)
}

fn main() -> ExitCode {
    let arg = Args::parse();

    let level = if arg.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_module("compsimp", level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .format_target(false)
        .init();

    match run(&arg) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            println!("[!] {}", e);
            ExitCode::FAILURE
        },
    }
}
