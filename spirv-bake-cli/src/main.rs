//! Command-line front end for the `spirv-bake` library: reads a module,
//! lists or bakes its specialization constants, and optionally times
//! repeated optimizer runs against the parsed shader.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;

use spirv_bake::{EdgeKind, Optimizer, OptimizerFlags, Shader, SpecConstant};

#[derive(Parser)]
#[command(name = "spirv-bake", version, about)]
struct Cli {
    /// Input SPIR-V module.
    input: PathBuf,

    /// Where to write the specialized module.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// A constant to bake, as ID=WORD[,WORD...]; words take decimal or 0x
    /// hex. May be repeated.
    #[arg(short = 's', long = "set", value_name = "ID=VALUES")]
    set: Vec<String>,

    /// List the module's specialization constants and exit.
    #[arg(short, long)]
    list: bool,

    /// Print everything the given result id feeds, then exit.
    #[arg(long, value_name = "ID")]
    trace: Option<u32>,

    /// Strip OpSource/OpName/OpMemberName from the output.
    #[arg(long)]
    strip_debug: bool,

    /// Re-run the optimizer N times and report the average latency.
    #[arg(long, value_name = "N")]
    time: Option<u32>,
}

fn parse_word(text: &str) -> Result<u32> {
    let text = text.trim();
    let parsed = if let Some(hex) = text.strip_prefix("0x") {
        u32::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    parsed.with_context(|| format!("invalid value '{text}'"))
}

fn parse_set(argument: &str) -> Result<SpecConstant> {
    let Some((id, values)) = argument.split_once('=') else {
        bail!("--set expects ID=VALUES, got '{argument}'");
    };
    let spec_id = parse_word(id)?;
    let values = values
        .split(',')
        .map(parse_word)
        .collect::<Result<Vec<u32>>>()?;
    Ok(SpecConstant::new(spec_id, values))
}

/// Prints the dependency tree below one result id, the way the module's
/// analysis graph records it: value consumers recurse, control edges and
/// result-less consumers print as leaves.
fn trace(shader: &Shader, root: u32) -> Result<()> {
    let Some(instruction) = shader.producer_instruction(root) else {
        bail!("result id %{root} is not defined by the module");
    };
    let mut visited = vec![false; shader.instruction_count()];
    let mut stack = vec![(instruction, 0u32, EdgeKind::Data)];
    while let Some((instruction, depth, kind)) = stack.pop() {
        let indent = (depth * 2) as usize;
        let opcode = shader.instruction_opcode(instruction).unwrap_or(0);
        let marker = match kind {
            EdgeKind::Data => "",
            EdgeKind::Control => " (control)",
        };
        match shader.instruction_result(instruction) {
            Some(id) => {
                // Phi cycles make the consumer graph loop; expand each
                // node once.
                if std::mem::replace(&mut visited[instruction as usize], true) {
                    println!("{:indent$}[{instruction}] %{id} (seen)", "");
                    continue;
                }
                println!("{:indent$}[{instruction}] %{id} = opcode {opcode}{marker}", "");
                for dependent in shader.dependents(id) {
                    stack.push((dependent.0, depth + 1, dependent.1));
                }
            }
            None => println!("{:indent$}[{instruction}] opcode {opcode}{marker}", ""),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let bytes = fs::read(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;

    let parse_start = Instant::now();
    let shader = Shader::parse(&bytes)
        .with_context(|| format!("failed to parse {}", cli.input.display()))?;
    let parse_elapsed = parse_start.elapsed();

    if cli.list {
        for constant in shader.spec_constants() {
            let words: Vec<String> = constant
                .values
                .iter()
                .map(|word| format!("0x{word:08x}"))
                .collect();
            println!("SpecId {:<4} = {}", constant.spec_id, words.join(" "));
        }
        return Ok(());
    }

    if let Some(id) = cli.trace {
        trace(&shader, id)?;
        return Ok(());
    }

    let spec_constants = cli
        .set
        .iter()
        .map(|argument| parse_set(argument))
        .collect::<Result<Vec<SpecConstant>>>()?;

    let mut flags = OptimizerFlags::empty();
    if cli.strip_debug {
        flags |= OptimizerFlags::STRIP_DEBUG;
    }

    let mut optimizer = Optimizer::new(&shader);
    let run_start = Instant::now();
    let output = optimizer.run(&spec_constants, flags)?;
    let run_elapsed = run_start.elapsed();

    eprintln!(
        "{}: {} -> {} bytes, parse {:.1?}, specialize {:.1?}",
        cli.input.display(),
        bytes.len(),
        output.len(),
        parse_elapsed,
        run_elapsed,
    );

    if let Some(rounds) = cli.time {
        if rounds > 0 {
            let timing_start = Instant::now();
            for _ in 0..rounds {
                optimizer.run(&spec_constants, flags)?;
            }
            let average = timing_start.elapsed() / rounds;
            eprintln!("average over {rounds} runs: {average:.1?}");
        }
    }

    if let Some(path) = &cli.output {
        fs::write(path, &output)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    Ok(())
}
