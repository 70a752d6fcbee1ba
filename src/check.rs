//! Check that a simplified graph computes the same outputs as the original.

use std::sync::Arc;

use fastrand::Rng;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::error::SimplifyError;
use crate::graph::{Graph, ValueInfo};
use crate::infer_shapes::{Dim, SymExpr};
use crate::interpreter::run_graph;
use crate::op_registry::OpRegistry;
use crate::options::{SimplifyOptions, Tolerance};
use crate::tensor::{DataType, Tensor};

/// Run `original` and `simplified` on `options.check_n` sets of generated
/// inputs and compare the outputs with the same names.
///
/// Returns `Ok(true)` if all outputs match (or `check_n` is zero) and
/// `Ok(false)` if any differ. Failures to generate inputs or run either
/// graph are errors.
pub fn check_equivalence(
    original: &Graph,
    simplified: &Graph,
    options: &SimplifyOptions,
    registry: &OpRegistry,
) -> Result<bool, SimplifyError> {
    if options.check_n == 0 {
        return Ok(true);
    }

    let results = (0..options.check_n)
        .into_par_iter()
        .map(|sample| {
            let inputs = generate_inputs(original, options, sample as u64)?;
            let expected = run_graph(original, &inputs, registry)?;
            let actual = run_graph(simplified, &inputs, registry)?;
            Ok(outputs_match(
                original,
                &expected,
                simplified,
                &actual,
                options.check_tolerance,
            ))
        })
        .collect::<Result<Vec<bool>, SimplifyError>>()?;

    let n_passed = results.iter().filter(|passed| **passed).count();
    debug!("{} of {} check samples passed", n_passed, results.len());
    Ok(n_passed == results.len())
}

/// Resolve a declared dimension to a size for generated inputs.
fn dim_size(dim: &Dim, dim_sizes: &FxHashMap<String, usize>) -> usize {
    match dim {
        Dim::Fixed(size) => *size as usize,
        Dim::Symbolic(SymExpr::Var(name)) => dim_sizes.get(name.as_ref()).copied().unwrap_or(1),
        Dim::Symbolic(_) | Dim::Unknown => 1,
    }
}

fn generate_input(
    input: &ValueInfo,
    options: &SimplifyOptions,
    rng: &mut Rng,
) -> Result<Tensor, SimplifyError> {
    let (Some(dtype), Some(shape)) = (input.dtype, input.shape.as_ref()) else {
        return Err(SimplifyError::InvalidOption(format!(
            "input \"{}\" has unknown type or rank, so a value must be given to check it",
            input.name
        )));
    };
    let shape: Vec<usize> = shape
        .iter()
        .map(|dim| dim_size(dim, &options.dim_sizes))
        .collect();
    let len: usize = shape.iter().product();

    let value = match dtype {
        DataType::Float | DataType::Double => {
            Tensor::from_f64s(dtype, shape, (0..len).map(|_| rng.f64()))
        }
        DataType::Bool => Tensor::from_i64s(dtype, shape, (0..len).map(|_| rng.bool() as i64)),
        _ => Tensor::zeros(dtype, shape),
    };
    value.ok_or_else(|| {
        SimplifyError::InvalidOption(format!(
            "cannot generate values of type {:?} for input \"{}\"",
            dtype, input.name
        ))
    })
}

/// Generate values for the runtime inputs of a graph.
///
/// Values from `options.custom_tensor_value_map` are used where given.
/// Otherwise floats are drawn uniformly from `[0, 1)`, booleans are random
/// and integers are zero, so that integer inputs used as indices or sizes
/// stay valid.
fn generate_inputs(
    graph: &Graph,
    options: &SimplifyOptions,
    seed: u64,
) -> Result<FxHashMap<String, Arc<Tensor>>, SimplifyError> {
    let mut rng = Rng::with_seed(seed);
    graph
        .runtime_inputs()
        .map(|input| {
            let value = match options.custom_tensor_value_map.get(&input.name) {
                Some(value) => value.clone(),
                None => generate_input(input, options, &mut rng)?,
            };
            Ok((input.name.clone(), Arc::new(value)))
        })
        .collect()
}

fn outputs_match(
    original: &Graph,
    expected: &[Arc<Tensor>],
    simplified: &Graph,
    actual: &[Arc<Tensor>],
    tolerance: Tolerance,
) -> bool {
    simplified
        .outputs
        .iter()
        .zip(actual)
        .all(|(output, actual)| {
            let Some(expected) = original
                .outputs
                .iter()
                .position(|o| o.name == output.name)
                .and_then(|idx| expected.get(idx))
            else {
                warn!("output \"{}\" is missing from the original graph", output.name);
                return false;
            };
            let equal = tensors_match(expected, actual, tolerance);
            if !equal {
                warn!("output \"{}\" differs after simplification", output.name);
            }
            equal
        })
}

/// Compare tensors. Floats are compared with a tolerance, other types
/// exactly.
fn tensors_match(expected: &Tensor, actual: &Tensor, tolerance: Tolerance) -> bool {
    if expected.dtype() != actual.dtype() || expected.shape() != actual.shape() {
        return false;
    }
    if !expected.dtype().is_float() {
        return expected.same_contents(actual);
    }
    let (Some(expected), Some(actual)) = (expected.to_f64_vec(), actual.to_f64_vec()) else {
        return false;
    };
    expected.iter().zip(&actual).all(|(b, a)| {
        (a.is_nan() && b.is_nan()) || (a - b).abs() <= tolerance.atol + tolerance.rtol * b.abs()
    })
}
