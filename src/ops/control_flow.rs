use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::graph::{CaptureEnv, Graph};
use crate::interpreter::{Plan, RunError};
use crate::op_registry::OpRegistry;
use crate::operator::{OpError, OpRunContext, Operator, OutputList, SubgraphOperator};
use crate::ops::concat::concat;
use crate::tensor::Tensor;

fn subgraph_only() -> OpError {
    OpError::UnsupportedValue("operator must be run with `run_subgraph`")
}

/// Return true if a condition tensor holds a single non-zero value.
fn is_truthy(cond: &Tensor) -> Result<bool, OpError> {
    match cond.to_i64_vec().as_deref() {
        Some([c]) => Ok(*c != 0),
        Some(_) => Err(OpError::InvalidValue("condition must have one element")),
        None => Err(OpError::UnsupportedType),
    }
}

pub struct If {
    pub then_branch: Graph,
    pub else_branch: Graph,
}

impl std::fmt::Debug for If {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "If {{ ... }}")
    }
}

impl Operator for If {
    fn name(&self) -> &str {
        "If"
    }

    fn run(&self, _ctx: &OpRunContext) -> Result<OutputList, OpError> {
        Err(subgraph_only())
    }

    fn as_subgraph_op(&self) -> Option<&dyn SubgraphOperator> {
        Some(self as &dyn SubgraphOperator)
    }
}

impl SubgraphOperator for If {
    fn subgraphs(&self) -> SmallVec<[&Graph; 2]> {
        [&self.then_branch, &self.else_branch].into()
    }

    fn run_subgraph(
        &self,
        ctx: &OpRunContext,
        captures: CaptureEnv,
        registry: &OpRegistry,
    ) -> Result<OutputList, RunError> {
        let op_error = |err| RunError::op_error(ctx.name(), self.name(), err);
        let cond = ctx.inputs().require(0).and_then(is_truthy).map_err(op_error)?;

        let branch = if cond {
            &self.then_branch
        } else {
            &self.else_branch
        };
        let outputs = Plan::new(branch, registry)?.run(&FxHashMap::default(), captures, registry)?;
        Ok(outputs.into_iter().map(Arc::unwrap_or_clone).collect())
    }
}

pub struct Loop {
    pub body: Graph,
}

impl std::fmt::Debug for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "Loop {{ ... }}")
    }
}

impl Operator for Loop {
    fn name(&self) -> &str {
        "Loop"
    }

    fn run(&self, _ctx: &OpRunContext) -> Result<OutputList, OpError> {
        Err(subgraph_only())
    }

    fn as_subgraph_op(&self) -> Option<&dyn SubgraphOperator> {
        Some(self as &dyn SubgraphOperator)
    }
}

impl Loop {
    /// Create the value of a scan output for a loop which ran zero times.
    ///
    /// This requires the body to declare the output's type and shape.
    fn empty_scan_output(&self, output_idx: usize) -> Result<Tensor, OpError> {
        let unknown = OpError::UnsupportedValue("scan output of loop with no iterations has unknown shape");
        let info = &self.body.outputs[output_idx];
        let (Some(dtype), Some(dims)) = (info.dtype, info.shape.as_ref()) else {
            return Err(unknown);
        };
        let mut shape = vec![0];
        for dim in dims {
            shape.push(dim.fixed().ok_or(unknown.clone())? as usize);
        }
        Tensor::zeros(dtype, shape).ok_or(OpError::UnsupportedType)
    }
}

/// Stack same-shaped tensors along a new leading axis.
fn stack(items: &[Tensor]) -> Result<Tensor, OpError> {
    let mut expanded = Vec::with_capacity(items.len());
    for item in items {
        let mut shape = vec![1];
        shape.extend(item.shape());
        expanded.push(item.reshaped(shape).ok_or(OpError::UnsupportedType)?);
    }
    let refs: Vec<&Tensor> = expanded.iter().collect();
    let dtype = refs[0].dtype();
    if refs.iter().any(|t| t.dtype() != dtype) {
        return Err(OpError::InvalidValue("scan output has different types across iterations"));
    }
    map_dtype!(dtype, T, concat::<T>(&refs, 0))
}

impl SubgraphOperator for Loop {
    fn subgraphs(&self) -> SmallVec<[&Graph; 2]> {
        SmallVec::from_slice(&[&self.body])
    }

    fn run_subgraph(
        &self,
        ctx: &OpRunContext,
        captures: CaptureEnv,
        registry: &OpRegistry,
    ) -> Result<OutputList, RunError> {
        let op_error = |err| RunError::op_error(ctx.name(), self.name(), err);
        let inputs = ctx.inputs();

        let max_trips = match inputs.get(0) {
            Some(t) => Some(t.item::<i64>().ok_or(op_error(OpError::InvalidValue(
                "trip count must be an int64 scalar",
            )))?),
            None => None,
        };
        let cond_input = inputs.get(1).map(is_truthy).transpose().map_err(op_error)?;
        if max_trips.is_none() && cond_input.is_none() {
            return Err(op_error(OpError::UnsupportedValue(
                "loop has neither a trip count nor a condition",
            )));
        }
        let mut cond = cond_input.unwrap_or(true);

        let mut carried: Vec<Arc<Tensor>> = Vec::new();
        for value in inputs.iter().skip(2) {
            let value = value.ok_or(op_error(OpError::MissingInputs))?;
            carried.push(Arc::new(value.clone()));
        }
        let n_carried = carried.len();
        if self.body.inputs.len() != n_carried + 2 || self.body.outputs.len() < n_carried + 1 {
            return Err(op_error(OpError::InvalidValue(
                "loop body signature does not match loop-carried values",
            )));
        }
        let n_scan = self.body.outputs.len() - 1 - n_carried;
        let mut scan_outputs: Vec<Vec<Tensor>> = vec![Vec::new(); n_scan];

        let plan = Plan::new(&self.body, registry)?;
        let mut iter_num = 0i64;
        while cond && max_trips.map_or(true, |m| iter_num < m) {
            let mut body_inputs = FxHashMap::default();
            body_inputs.insert(
                self.body.inputs[0].name.clone(),
                Arc::new(Tensor::from_scalar(iter_num)),
            );
            body_inputs.insert(self.body.inputs[1].name.clone(), Arc::new(Tensor::from_scalar(cond)));
            for (info, value) in self.body.inputs[2..].iter().zip(carried.drain(..)) {
                body_inputs.insert(info.name.clone(), value);
            }

            let mut outputs = plan.run(&body_inputs, captures, registry)?.into_iter();

            // Body outputs are (cond, carried values..., scan outputs...).
            let next_cond = outputs.next().ok_or(op_error(OpError::MissingInputs))?;
            if cond_input.is_some() {
                cond = is_truthy(&next_cond).map_err(op_error)?;
            }
            carried.extend(outputs.by_ref().take(n_carried));
            for (scan, value) in scan_outputs.iter_mut().zip(outputs) {
                scan.push(Arc::unwrap_or_clone(value));
            }
            iter_num += 1;
        }

        let mut result: OutputList = carried.into_iter().map(Arc::unwrap_or_clone).collect();
        for (i, items) in scan_outputs.iter().enumerate() {
            let output = if items.is_empty() {
                self.empty_scan_output(1 + n_carried + i)
            } else {
                stack(items)
            };
            result.push(output.map_err(op_error)?);
        }
        Ok(result)
    }
}
