use std::collections::VecDeque;
use std::error::Error;
use std::fs;

use onnxsim::{DiagnosticLevel, Dim, SimplifyOptions, REWRITE_NAMES};
use rustc_hash::FxHashMap;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod dim_spec;

use dim_spec::{DimSize, InputShape};

struct Args {
    /// Model file to simplify.
    input: String,

    /// Path to write the simplified model to.
    output: String,

    options: SimplifyOptions,

    /// Enable debug logging.
    verbose: bool,
}

fn parse_args() -> Result<Args, lexopt::Error> {
    use lexopt::prelude::*;

    let mut values = VecDeque::new();
    let mut verbose = false;
    let mut options = SimplifyOptions {
        check_n: 3,
        ..Default::default()
    };

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Value(val) => values.push_back(val.string()?),
            Long("check-n") => options.check_n = parser.value()?.parse()?,
            Long("dynamic-input-shape") => options.dynamic_input_shape = true,
            Long("include-subgraph") => options.include_subgraph = true,
            Long("unused-output") => options.unused_output.push(parser.value()?.string()?),
            Long("skip-shape-inference") => options.skip_shape_inference = true,
            Long("skip-constant-folding") => options.skip_constant_folding = true,
            Long("skip-optimization") => options.skip_optimization = true,
            Long("skip-rewrite") => options.skipped_rewrites.push(parser.value()?.string()?),
            Long("overwrite-input-shape") => {
                let spec = parser.value()?.string()?;
                let InputShape { input_name, shape } =
                    InputShape::parse(&spec).map_err(|err| err.to_string())?;
                let dims = shape.into_iter().map(|size| Dim::Fixed(size as u64)).collect();
                options.overwrite_input_shapes.push((input_name, dims));
            }
            Long("dim") => {
                let spec = parser.value()?.string()?;
                let DimSize { dim_name, size } =
                    DimSize::parse(&spec).map_err(|err| err.to_string())?;
                options.dim_sizes.insert(dim_name, size);
            }
            Long("tensor-size-threshold") => {
                options.tensor_size_threshold = Some(parser.value()?.parse()?)
            }
            Long("max-iterations") => options.max_iterations = parser.value()?.parse()?,
            Short('v') | Long("verbose") => {
                verbose = true;
                options.diagnostic_level = DiagnosticLevel::Info;
            }
            Short('h') | Long("help") => {
                println!(
                    "Simplify ONNX models.

Usage: {bin_name} [OPTIONS] <input> <output>

Options:
  --check-n <N>
    Number of random inputs used to check the simplified model [default: 3]

  --dynamic-input-shape
    Allow inputs with symbolic or unknown dimensions

  --include-subgraph
    Simplify subgraphs of control flow operators

  --unused-output <name>
    Remove an output of the model. May be repeated.

  --skip-shape-inference
  --skip-constant-folding
  --skip-optimization
    Disable shape inference, constant folding or all rewrite rules

  --skip-rewrite <name>
    Disable a rewrite rule. May be repeated. Rules are:
    {rewrites}

  --overwrite-input-shape <name>:<d1>,<d2>...
    Replace the shape of an input. May be repeated.

  --dim <name>=<size>
    Size of a symbolic dimension when checking the model. May be repeated.

  --tensor-size-threshold <bytes>
    Do not fold values larger than this

  --max-iterations <N>
    Maximum number of passes over each graph

  -v, --verbose
    Enable verbose logging

  -h, --help
    Print help
",
                    bin_name = parser.bin_name().unwrap_or("onnxsim"),
                    rewrites = REWRITE_NAMES.join(", "),
                );
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected()),
        }
    }

    let input = values.pop_front().ok_or("missing `<input>` arg")?;
    let output = values.pop_front().ok_or("missing `<output>` arg")?;

    Ok(Args {
        input,
        output,
        options,
        verbose,
    })
}

/// Print operator counts before and after simplification, one row per
/// operator type.
fn print_op_counts(before: &FxHashMap<String, usize>, after: &FxHashMap<String, usize>) {
    let mut op_types: Vec<&str> = before.keys().chain(after.keys()).map(|s| s.as_str()).collect();
    op_types.sort();
    op_types.dedup();

    let width = op_types.iter().map(|s| s.len()).max().unwrap_or(0).max(8);
    println!("{:<width$}  {:>8}  {:>8}", "Operator", "Before", "After", width = width);

    let count = |counts: &FxHashMap<String, usize>, op: &str| counts.get(op).copied().unwrap_or(0);
    for op in op_types {
        println!(
            "{:<width$}  {:>8}  {:>8}",
            op,
            count(before, op),
            count(after, op),
            width = width
        );
    }

    let total = |counts: &FxHashMap<String, usize>| counts.values().sum::<usize>();
    println!(
        "{:<width$}  {:>8}  {:>8}",
        "Total",
        total(before),
        total(after),
        width = width
    );
}

/// Simplify an ONNX model.
///
/// ```
/// onnxsim model.onnx model-sim.onnx --dynamic-input-shape --dim batch=2
/// ```
///
/// Set `RUST_LOG` to control logging, eg. `RUST_LOG=onnxsim=trace`.
fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args()?;

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let model_bytes = fs::read(&args.input)?;
    let original = onnxsim::Model::load(&model_bytes)?;
    let result = onnxsim::simplify_model(&original, &args.options)?;
    debug!("collected {} diagnostics", result.diagnostics.len());
    if args.verbose {
        for diagnostic in &result.diagnostics {
            eprintln!("{}", diagnostic);
        }
    }

    fs::write(&args.output, result.to_bytes())?;

    print_op_counts(&original.graph.op_counts(), &result.model.graph.op_counts());

    for subgraph in &result.unsimplified_subgraphs {
        println!(
            "Subgraph {} was not fully simplified: {}",
            subgraph.location, subgraph.reason
        );
    }
    if result.iteration_cap_hit {
        println!(
            "Graph was still changing after {} passes",
            args.options.max_iterations
        );
    }

    if args.options.check_n == 0 {
        println!("Check skipped");
    } else if result.check_passed {
        println!("Check passed");
    } else {
        println!("Check failed: simplified model outputs differ from the original");
        std::process::exit(1);
    }

    Ok(())
}
