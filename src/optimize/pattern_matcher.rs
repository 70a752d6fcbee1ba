use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::graph::Node;
use crate::tensor::Tensor;

/// Graph view used to match patterns.
pub trait MatchGraph {
    /// Return the index and node which produces `value`, if it is produced
    /// by a node in the current graph.
    fn producer(&self, value: &str) -> Option<(usize, &Node)>;

    /// Return the value of `value` if it is a known constant.
    fn constant(&self, value: &str) -> Option<&Tensor>;
}

#[derive(Clone, Debug, PartialEq)]
enum Binding {
    Value(String),
    Node(usize),
}

/// Tracks an association between named symbols (variables) in a pattern and
/// the values or nodes they have been resolved to.
struct SymbolMap {
    // Modified only by extending and truncating it.
    symbols: Vec<(&'static str, Binding)>,

    // Stack of checkpoints. Each is the length of `symbols` at the time of
    // the checkpoint.
    checkpoints: Vec<usize>,
}

impl SymbolMap {
    fn new() -> SymbolMap {
        SymbolMap {
            symbols: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    /// Save the current state of the map.
    ///
    /// This is needed to backtrack during pattern matching.
    fn checkpoint(&mut self) {
        self.checkpoints.push(self.symbols.len());
    }

    /// Discard any new symbols recorded since the last call to `checkpoint`.
    fn revert(&mut self) {
        if let Some(checkpoint) = self.checkpoints.pop() {
            self.symbols.truncate(checkpoint);
        }
    }

    fn add(&mut self, name: &'static str, binding: Binding) {
        self.symbols.push((name, binding));
    }

    fn find(&self, name: &str) -> Option<&Binding> {
        self.symbols
            .iter()
            .find(|(sym_name, _)| *sym_name == name)
            .map(|(_, binding)| binding)
    }
}

/// The result of matching a [`Pattern`] against a value in a graph.
pub struct Match {
    symbols: SymbolMap,
}

impl Match {
    /// Return the name of the value that a symbol was resolved to.
    pub fn value(&self, name: &str) -> Option<&str> {
        match self.symbols.find(name)? {
            Binding::Value(value) => Some(value),
            Binding::Node(_) => None,
        }
    }

    /// Return the index of the node that a named operator pattern matched.
    pub fn node(&self, name: &str) -> Option<usize> {
        match self.symbols.find(name)? {
            Binding::Node(idx) => Some(*idx),
            Binding::Value(_) => None,
        }
    }
}

/// Matches a constant whose elements all equal `value` exactly.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantPattern {
    value: f64,
}

impl ConstantPattern {
    fn matches(&self, tensor: &Tensor) -> bool {
        !tensor.is_empty()
            && tensor
                .to_f64_vec()
                .is_some_and(|elems| elems.iter().all(|x| *x == self.value))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OpPattern {
    /// Operator type (eg. "MatMul").
    op_type: &'static str,

    /// Patterns that the inputs must match.
    inputs: Vec<Pattern>,

    /// Identifier which can be used to look up the node index after a
    /// successful match.
    key: Option<&'static str>,
}

/// Return true if a binary operator's result does not depend on the order of
/// its inputs.
fn is_commutative(op_type: &str) -> bool {
    matches!(
        op_type,
        "Add" | "Mul" | "Max" | "Min" | "Sum" | "Mean" | "And" | "Or" | "Xor" | "Equal"
    )
}

impl OpPattern {
    fn matches(&self, node: &Node, graph: &dyn MatchGraph, symbols: &mut SymbolMap) -> bool {
        if node.op_type != self.op_type || !node.is_default_domain() {
            return false;
        }
        let n_inputs = node
            .inputs
            .iter()
            .rposition(|name| !name.is_empty())
            .map(|pos| pos + 1)
            .unwrap_or(0);
        if self.inputs.len() != n_inputs {
            return false;
        }

        // For commutative binary operators, the pattern may match either way
        // around.
        if let (true, [pat_a, pat_b], [input_a, input_b]) = (
            is_commutative(self.op_type),
            &self.inputs[..],
            &node.inputs[..n_inputs],
        ) {
            symbols.checkpoint();
            if pat_a.test_impl(input_a, graph, symbols) && pat_b.test_impl(input_b, graph, symbols) {
                return true;
            }
            symbols.revert();
            pat_b.test_impl(input_a, graph, symbols) && pat_a.test_impl(input_b, graph, symbols)
        } else {
            self.inputs
                .iter()
                .zip(&node.inputs)
                .all(|(pat, input)| !input.is_empty() && pat.test_impl(input, graph, symbols))
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SymbolPattern {
    name: &'static str,

    /// True if this symbol can only match a constant.
    constant: bool,
}

/// Specifies a pattern for a subgraph within a [`Graph`](crate::graph::Graph).
///
/// Patterns consist of matchers for operators, constants and symbols
/// (variables). A value matches if it is the output of a subgraph that
/// matches the pattern.
///
/// Patterns are created using constructor methods and combined to form
/// patterns that can match sub-graphs. For example
/// `Pattern::symbol("x") + 0.0` describes an `Add` operator that takes a
/// free variable `x` and a constant zero as inputs.
#[derive(Clone, Debug, PartialEq)]
pub enum Pattern {
    /// Matches an operator.
    Operator(OpPattern),
    /// Matches a constant value.
    Constant(ConstantPattern),
    /// Matches either a constant or a value.
    Symbol(SymbolPattern),
}

impl Pattern {
    /// Create a pattern that matches an operator.
    pub fn operator<I: Into<Vec<Pattern>>>(op_type: &'static str, inputs: I) -> Pattern {
        Pattern::Operator(OpPattern {
            op_type,
            inputs: inputs.into(),
            key: None,
        })
    }

    /// Create a pattern that matches a binary operator.
    pub fn binary_op<A: Into<Pattern>, B: Into<Pattern>>(
        op_type: &'static str,
        input_a: A,
        input_b: B,
    ) -> Pattern {
        let inputs: [Pattern; 2] = [input_a.into(), input_b.into()];
        Pattern::operator(op_type, inputs)
    }

    /// Create a pattern that matches a unary operator.
    pub fn unary_op<I: Into<Pattern>>(op_type: &'static str, input: I) -> Pattern {
        let inputs: [Pattern; 1] = [input.into()];
        Pattern::operator(op_type, inputs)
    }

    /// Set the identifier for a pattern, used to look up the node index in a
    /// match using [`Match::node`].
    pub fn with_name(self, name: &'static str) -> Pattern {
        match self {
            Pattern::Operator(mut op) => {
                op.key = Some(name);
                Pattern::Operator(op)
            }
            Pattern::Symbol(mut symbol) => {
                symbol.name = name;
                Pattern::Symbol(symbol)
            }
            Pattern::Constant(constant) => Pattern::Constant(constant),
        }
    }

    /// Create a pattern that matches a constant whose elements all have a
    /// given value.
    pub fn constant(value: f64) -> Pattern {
        Pattern::Constant(ConstantPattern { value })
    }

    /// Create a pattern that matches any value.
    ///
    /// In order for a pattern to match, all symbols with the same name must
    /// resolve to the same value.
    pub fn symbol(name: &'static str) -> Pattern {
        Pattern::Symbol(SymbolPattern {
            name,
            constant: false,
        })
    }

    /// Create a pattern that matches a constant.
    ///
    /// Unlike [`constant`](Self::constant), the value of the constant is not
    /// specified.
    pub fn const_symbol(name: &'static str) -> Pattern {
        Pattern::Symbol(SymbolPattern {
            name,
            constant: true,
        })
    }

    /// Test whether `value` is the output of a subgraph matching this
    /// pattern.
    ///
    /// If the pattern matches, this returns a [`Match`] which allows looking
    /// up the values and nodes that symbols in the pattern were resolved to.
    pub fn test(&self, value: &str, graph: &dyn MatchGraph) -> Option<Match> {
        let mut symbols = SymbolMap::new();
        if self.test_impl(value, graph, &mut symbols) {
            Some(Match { symbols })
        } else {
            None
        }
    }

    fn test_impl(&self, value: &str, graph: &dyn MatchGraph, symbols: &mut SymbolMap) -> bool {
        match self {
            Pattern::Operator(op_pat) => {
                let Some((node_idx, node)) = graph.producer(value) else {
                    return false;
                };
                if !op_pat.matches(node, graph, symbols) {
                    return false;
                }
                if let Some(key) = op_pat.key {
                    symbols.add(key, Binding::Node(node_idx));
                }
                true
            }
            Pattern::Constant(const_pat) => graph
                .constant(value)
                .is_some_and(|tensor| const_pat.matches(tensor)),
            Pattern::Symbol(sym_pat) => {
                if sym_pat.constant && graph.constant(value).is_none() {
                    return false;
                }

                // If we have seen this symbol before, it must resolve to the
                // same value. Otherwise it always matches.
                if let Some(resolved) = symbols.find(sym_pat.name) {
                    *resolved == Binding::Value(value.to_string())
                } else {
                    symbols.add(sym_pat.name, Binding::Value(value.to_string()));
                    true
                }
            }
        }
    }
}

impl From<f64> for Pattern {
    fn from(val: f64) -> Pattern {
        Pattern::constant(val)
    }
}

macro_rules! impl_binop_for_pattern {
    ($trait:ident, $method:ident, $op_name:expr) => {
        impl<I: Into<Pattern>> $trait<I> for Pattern {
            type Output = Pattern;

            fn $method(self, rhs: I) -> Pattern {
                Pattern::binary_op($op_name, self, rhs.into())
            }
        }

        impl $trait<Pattern> for f64 {
            type Output = Pattern;

            fn $method(self, rhs: Pattern) -> Pattern {
                Pattern::binary_op($op_name, Pattern::constant(self), rhs)
            }
        }
    };
}
impl_binop_for_pattern!(Add, add, "Add");
impl_binop_for_pattern!(Mul, mul, "Mul");
impl_binop_for_pattern!(Div, div, "Div");
impl_binop_for_pattern!(Sub, sub, "Sub");

impl Neg for Pattern {
    type Output = Pattern;

    fn neg(self) -> Pattern {
        Pattern::unary_op("Neg", self)
    }
}

#[cfg(test)]
mod tests {
    use rustc_hash::FxHashMap;

    use super::{MatchGraph, Pattern};
    use crate::graph::{Expr, Graph, Node};
    use crate::tensor::Tensor;

    struct TestGraph {
        graph: Graph,
        producers: FxHashMap<String, usize>,
    }

    impl TestGraph {
        fn new(graph: Graph) -> TestGraph {
            let producers = graph
                .producers()
                .into_iter()
                .map(|(name, idx)| (name.to_string(), idx))
                .collect();
            TestGraph { graph, producers }
        }

        fn output(&self) -> &str {
            &self.graph.outputs[0].name
        }
    }

    impl MatchGraph for TestGraph {
        fn producer(&self, value: &str) -> Option<(usize, &Node)> {
            let idx = *self.producers.get(value)?;
            Some((idx, &self.graph.nodes[idx]))
        }

        fn constant(&self, value: &str) -> Option<&Tensor> {
            self.graph.initializer(value).map(|t| t.as_ref())
        }
    }

    /// Create a graph that implements the softsign function `x / 1 + |x|`.
    fn softsign_graph() -> TestGraph {
        let x = Expr::value("x");
        let expr = x.clone() / (Expr::scalar(1.0f32) + x.unary("Abs"));
        TestGraph::new(expr.build_graph(["x"]))
    }

    #[test]
    fn test_pattern_match() {
        struct Case {
            pattern: Pattern,
            expect_match: bool,
        }

        let x = Pattern::symbol("x");
        let c = Pattern::const_symbol("c");
        let unary_op = Pattern::unary_op;

        let cases = [
            Case {
                pattern: x.clone() / (1.0 + unary_op("Abs", x.clone())),
                expect_match: true,
            },
            // Constant symbol instead of fixed constant.
            Case {
                pattern: x.clone() / (c.clone() + unary_op("Abs", x.clone())),
                expect_match: true,
            },
            // Operands of a non-commutative operator ("/") swapped.
            Case {
                pattern: (1.0 + unary_op("Abs", x.clone())) / x.clone(),
                expect_match: false,
            },
            // Operands of a commutative operator ("+") swapped.
            Case {
                pattern: x.clone() / (unary_op("Abs", x.clone()) + 1.0),
                expect_match: true,
            },
            // "+" swapped for "-".
            Case {
                pattern: x.clone() / (1.0 - unary_op("Abs", x.clone())),
                expect_match: false,
            },
            // Constants must match exactly.
            Case {
                pattern: x.clone() / (1.00001 + unary_op("Abs", x.clone())),
                expect_match: false,
            },
            // Symbol "x" does not resolve to the same value in all positions.
            Case {
                pattern: x.clone() / (x.clone() + unary_op("Abs", x.clone())),
                expect_match: false,
            },
            // Dynamic input matched against a constant symbol.
            Case {
                pattern: c.clone() / (1.0 + unary_op("Abs", x.clone())),
                expect_match: false,
            },
        ];

        let graph = softsign_graph();
        for (i, Case { pattern, expect_match }) in cases.into_iter().enumerate() {
            let pat_match = pattern.test(graph.output(), &graph);
            assert_eq!(pat_match.is_some(), expect_match, "mismatch for case {}", i);
            if let Some(pat_match) = pat_match {
                assert_eq!(pat_match.value("x"), Some("x"));
            }
        }
    }

    #[test]
    fn test_operator_with_key() {
        let graph = softsign_graph();
        let x = Pattern::symbol("x");
        let pat = x.clone() / (1.0 + Pattern::unary_op("Abs", x.clone()).with_name("abs_op"));
        let pat_match = pat.test(graph.output(), &graph).unwrap();
        let abs_idx = pat_match.node("abs_op").unwrap();
        assert_eq!(graph.graph.nodes[abs_idx].op_type, "Abs");
        assert_eq!(pat_match.node("x"), None);
    }

    #[test]
    fn test_constant_pattern_matches_all_elements() {
        let x = Expr::value("x");
        let zeros = Expr::constant(Tensor::from_vec(vec![0i64, 0, 0]));
        let graph = TestGraph::new((x + zeros).build_graph(["x"]));
        assert!((Pattern::symbol("x") + 0.0).test(graph.output(), &graph).is_some());
        assert!((Pattern::symbol("x") + 1.0).test(graph.output(), &graph).is_none());
    }
}
