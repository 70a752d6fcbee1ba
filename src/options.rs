use rustc_hash::FxHashMap;

use crate::env::env_usize;
use crate::error::SimplifyError;
use crate::infer_shapes::Dim;
use crate::optimize::rewrites::REWRITE_NAMES;
use crate::optimize::DiagnosticLevel;
use crate::tensor::Tensor;

/// Default maximum number of optimization passes over a graph.
pub const DEFAULT_MAX_ITERATIONS: usize = 32;

/// Tolerance for comparing float outputs when checking equivalence.
///
/// Elements `a` (simplified) and `b` (original) are equal if
/// `|a - b| <= atol + rtol * |b|`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance {
            rtol: 1e-3,
            atol: 1e-4,
        }
    }
}

/// Options that control simplification.
///
/// Construct with `SimplifyOptions::default()` and set fields as needed.
#[derive(Clone, Debug)]
pub struct SimplifyOptions {
    /// Number of random input samples used to check that the simplified
    /// model computes the same outputs as the original. Zero disables
    /// checking.
    pub check_n: usize,

    /// Allow inputs whose shapes contain symbolic or unknown dimensions.
    ///
    /// Without this, such inputs are an error unless their shapes are fixed
    /// via `overwrite_input_shapes`.
    pub dynamic_input_shape: bool,

    /// Simplify the subgraphs of control flow operators.
    pub include_subgraph: bool,

    /// Names of graph outputs to remove before simplifying.
    pub unused_output: Vec<String>,

    pub skip_shape_inference: bool,

    /// Values to use for specific inputs when checking equivalence, instead
    /// of randomly generated ones.
    pub custom_tensor_value_map: FxHashMap<String, Tensor>,

    pub skip_constant_folding: bool,

    /// Disable all rewrite rules. Constant folding and dead code
    /// elimination still run.
    pub skip_optimization: bool,

    /// Names of individual rewrite rules to disable.
    pub skipped_rewrites: Vec<String>,

    /// Replacement shapes for graph inputs, applied before inference.
    pub overwrite_input_shapes: Vec<(String, Vec<Dim>)>,

    /// Maximum size in bytes of a folded tensor. Nodes whose outputs would
    /// be larger are kept.
    pub tensor_size_threshold: Option<usize>,

    /// Maximum number of passes over each graph. Reaching this limit is
    /// reported in the result.
    ///
    /// Defaults to the value of the `ONNXSIM_MAX_ITERATIONS` environment
    /// variable if set, or [`DEFAULT_MAX_ITERATIONS`] otherwise.
    pub max_iterations: usize,

    pub check_tolerance: Tolerance,

    /// Sizes of symbolic dimensions, used to generate inputs when checking.
    /// Symbols without an entry have size 1.
    pub dim_sizes: FxHashMap<String, usize>,

    /// Which optimizer diagnostics to collect.
    pub diagnostic_level: DiagnosticLevel,
}

impl Default for SimplifyOptions {
    fn default() -> Self {
        SimplifyOptions {
            check_n: 0,
            dynamic_input_shape: false,
            include_subgraph: false,
            unused_output: Vec::new(),
            skip_shape_inference: false,
            custom_tensor_value_map: FxHashMap::default(),
            skip_constant_folding: false,
            skip_optimization: false,
            skipped_rewrites: Vec::new(),
            overwrite_input_shapes: Vec::new(),
            tensor_size_threshold: None,
            max_iterations: env_usize("ONNXSIM_MAX_ITERATIONS").unwrap_or(DEFAULT_MAX_ITERATIONS),
            check_tolerance: Tolerance::default(),
            dim_sizes: FxHashMap::default(),
            diagnostic_level: DiagnosticLevel::Warn,
        }
    }
}

impl SimplifyOptions {
    /// Check for options which are invalid regardless of the model.
    pub fn validate(&self) -> Result<(), SimplifyError> {
        let invalid = |msg: String| Err(SimplifyError::InvalidOption(msg));

        if self.max_iterations == 0 {
            return invalid("max_iterations must be at least 1".to_string());
        }
        for name in &self.skipped_rewrites {
            if !REWRITE_NAMES.contains(&name.as_str()) {
                return invalid(format!("unknown rewrite \"{}\"", name));
            }
        }
        let Tolerance { rtol, atol } = self.check_tolerance;
        if !(rtol >= 0. && atol >= 0.) {
            return invalid("check tolerances must be non-negative".to_string());
        }
        for (name, dims) in &self.overwrite_input_shapes {
            if dims.iter().any(|d| !d.is_fixed()) {
                return invalid(format!("shape for input \"{}\" must have fixed sizes", name));
            }
        }
        Ok(())
    }

    /// Return true if the rewrite rule `name` is enabled.
    pub fn rewrite_enabled(&self, name: &str) -> bool {
        !self.skip_optimization && !self.skipped_rewrites.iter().any(|s| s == name)
    }
}

#[cfg(test)]
mod tests {
    use super::{SimplifyOptions, Tolerance};
    use crate::error::SimplifyError;
    use crate::infer_shapes::Dim;

    #[test]
    fn test_validate() {
        struct Case {
            options: SimplifyOptions,
            valid: bool,
        }

        let cases = [
            Case {
                options: SimplifyOptions::default(),
                valid: true,
            },
            Case {
                options: SimplifyOptions {
                    skipped_rewrites: vec!["eliminate_identity".to_string()],
                    ..Default::default()
                },
                valid: true,
            },
            Case {
                options: SimplifyOptions {
                    skipped_rewrites: vec!["fuse_everything".to_string()],
                    ..Default::default()
                },
                valid: false,
            },
            Case {
                options: SimplifyOptions {
                    max_iterations: 0,
                    ..Default::default()
                },
                valid: false,
            },
            Case {
                options: SimplifyOptions {
                    check_tolerance: Tolerance {
                        rtol: -1.,
                        atol: 0.,
                    },
                    ..Default::default()
                },
                valid: false,
            },
            Case {
                options: SimplifyOptions {
                    overwrite_input_shapes: vec![("x".to_string(), vec![Dim::symbol("n")])],
                    ..Default::default()
                },
                valid: false,
            },
        ];

        for (i, case) in cases.iter().enumerate() {
            let result = case.options.validate();
            assert_eq!(result.is_ok(), case.valid, "case {}", i);
            if let Err(err) = result {
                assert!(matches!(err, SimplifyError::InvalidOption(_)));
            }
        }
    }

    #[test]
    fn test_rewrite_enabled() {
        let mut opts = SimplifyOptions {
            skipped_rewrites: vec!["eliminate_identity".to_string()],
            ..Default::default()
        };
        assert!(!opts.rewrite_enabled("eliminate_identity"));
        assert!(opts.rewrite_enabled("eliminate_nop_cast"));

        opts.skip_optimization = true;
        assert!(!opts.rewrite_enabled("eliminate_nop_cast"));
    }
}
