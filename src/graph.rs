//! In-memory representation of ONNX graphs.
//!
//! A [`Graph`] is a list of [`Node`]s plus the named values they read from:
//! initializers (named constants), graph inputs and the outputs of other
//! nodes. Values are referred to by name. Nodes of control flow operators
//! (`If`, `Loop`) own nested graphs via their attributes. A nested graph may
//! refer to values from enclosing graphs by name, like a closure.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use onnxsim_onnx::onnx;
use onnxsim_onnx::protobuf::EncodeMessage;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::SimplifyError;
use crate::infer_shapes::Dim;
use crate::tensor::{DataType, Tensor};

mod builder;
mod capture_env;

pub use builder::Expr;
pub use capture_env::CaptureEnv;

/// Value of a node attribute.
#[derive(Clone, Debug)]
pub enum AttrValue {
    Float(f32),
    Int(i64),
    String(Vec<u8>),
    Tensor(Tensor),
    Graph(Box<Graph>),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<Vec<u8>>),
    Tensors(Vec<Tensor>),
    Graphs(Vec<Graph>),
    /// Attribute with no value, such as a reference to a function attribute.
    Undefined,
}

impl AttrValue {
    fn attr_type(&self) -> onnx::AttributeType {
        match self {
            AttrValue::Float(_) => onnx::AttributeType::FLOAT,
            AttrValue::Int(_) => onnx::AttributeType::INT,
            AttrValue::String(_) => onnx::AttributeType::STRING,
            AttrValue::Tensor(_) => onnx::AttributeType::TENSOR,
            AttrValue::Graph(_) => onnx::AttributeType::GRAPH,
            AttrValue::Floats(_) => onnx::AttributeType::FLOATS,
            AttrValue::Ints(_) => onnx::AttributeType::INTS,
            AttrValue::Strings(_) => onnx::AttributeType::STRINGS,
            AttrValue::Tensors(_) => onnx::AttributeType::TENSORS,
            AttrValue::Graphs(_) => onnx::AttributeType::GRAPHS,
            AttrValue::Undefined => onnx::AttributeType::UNDEFINED,
        }
    }
}

/// Named attribute of a node.
#[derive(Clone, Debug)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
    doc_string: Option<String>,
    ref_attr_name: Option<String>,
    /// Whether the `type` field was present in the decoded attribute.
    has_type: bool,
    unknown: Vec<u8>,
}

impl Attribute {
    pub fn new(name: &str, value: AttrValue) -> Attribute {
        Attribute {
            name: name.to_string(),
            value,
            doc_string: None,
            ref_attr_name: None,
            has_type: true,
            unknown: Vec::new(),
        }
    }

    fn from_proto(proto: &onnx::AttributeProto) -> Result<Attribute, SimplifyError> {
        let name = proto.name.clone().unwrap_or_default();
        let malformed = |msg: &str| {
            SimplifyError::MalformedGraph(format!("attribute \"{}\": {}", name, msg))
        };

        // Older models may omit the `type` field, in which case the type is
        // determined by which value field is set.
        let attr_type = proto.r#type.unwrap_or(if proto.f.is_some() {
            onnx::AttributeType::FLOAT
        } else if proto.i.is_some() {
            onnx::AttributeType::INT
        } else if proto.s.is_some() {
            onnx::AttributeType::STRING
        } else if proto.t.is_some() {
            onnx::AttributeType::TENSOR
        } else if proto.g.is_some() {
            onnx::AttributeType::GRAPH
        } else if !proto.floats.is_empty() {
            onnx::AttributeType::FLOATS
        } else if !proto.ints.is_empty() {
            onnx::AttributeType::INTS
        } else if !proto.strings.is_empty() {
            onnx::AttributeType::STRINGS
        } else if !proto.tensors.is_empty() {
            onnx::AttributeType::TENSORS
        } else if !proto.graphs.is_empty() {
            onnx::AttributeType::GRAPHS
        } else {
            onnx::AttributeType::UNDEFINED
        });

        let value = match attr_type {
            onnx::AttributeType::FLOAT => AttrValue::Float(proto.f.unwrap_or_default()),
            onnx::AttributeType::INT => AttrValue::Int(proto.i.unwrap_or_default()),
            onnx::AttributeType::STRING => AttrValue::String(proto.s.clone().unwrap_or_default()),
            onnx::AttributeType::TENSOR => {
                let t = proto.t.as_ref().ok_or_else(|| malformed("missing tensor value"))?;
                AttrValue::Tensor(Tensor::from_proto(t)?)
            }
            onnx::AttributeType::GRAPH => {
                let g = proto.g.as_ref().ok_or_else(|| malformed("missing graph value"))?;
                AttrValue::Graph(Box::new(Graph::from_proto(g)?))
            }
            onnx::AttributeType::FLOATS => AttrValue::Floats(proto.floats.clone()),
            onnx::AttributeType::INTS => AttrValue::Ints(proto.ints.clone()),
            onnx::AttributeType::STRINGS => AttrValue::Strings(proto.strings.clone()),
            onnx::AttributeType::TENSORS => AttrValue::Tensors(
                proto
                    .tensors
                    .iter()
                    .map(Tensor::from_proto)
                    .collect::<Result<_, _>>()?,
            ),
            onnx::AttributeType::GRAPHS => AttrValue::Graphs(
                proto
                    .graphs
                    .iter()
                    .map(Graph::from_proto)
                    .collect::<Result<_, _>>()?,
            ),
            onnx::AttributeType::UNDEFINED => AttrValue::Undefined,
            _ => return Err(malformed("unsupported attribute type")),
        };

        Ok(Attribute {
            name,
            value,
            doc_string: proto.doc_string.clone(),
            ref_attr_name: proto.ref_attr_name.clone(),
            has_type: proto.r#type.is_some(),
            unknown: proto.unknown.clone(),
        })
    }

    fn to_proto(&self) -> onnx::AttributeProto {
        let mut proto = onnx::AttributeProto {
            name: Some(self.name.clone()),
            doc_string: self.doc_string.clone(),
            ref_attr_name: self.ref_attr_name.clone(),
            r#type: self.has_type.then(|| self.value.attr_type()),
            unknown: self.unknown.clone(),
            ..Default::default()
        };
        match &self.value {
            AttrValue::Float(f) => proto.f = Some(*f),
            AttrValue::Int(i) => proto.i = Some(*i),
            AttrValue::String(s) => proto.s = Some(s.clone()),
            AttrValue::Tensor(t) => proto.t = Some(t.to_proto(t_name(t))),
            AttrValue::Graph(g) => proto.g = Some(g.to_proto()),
            AttrValue::Floats(f) => proto.floats = f.clone(),
            AttrValue::Ints(i) => proto.ints = i.clone(),
            AttrValue::Strings(s) => proto.strings = s.clone(),
            AttrValue::Tensors(t) => proto.tensors = t.iter().map(|t| t.to_proto(t_name(t))).collect(),
            AttrValue::Graphs(g) => proto.graphs = g.iter().map(|g| g.to_proto()).collect(),
            AttrValue::Undefined => {}
        }
        proto
    }
}

/// Return the name a tensor attribute was decoded with.
fn t_name(t: &Tensor) -> Option<&str> {
    t.origin_name()
}

/// An operator invocation in a graph.
///
/// Inputs and outputs are value names. An empty name marks an omitted
/// optional input or output.
#[derive(Clone, Debug, Default)]
pub struct Node {
    pub name: Option<String>,
    pub op_type: String,
    pub domain: Option<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: Vec<Attribute>,
    pub doc_string: Option<String>,
    unknown: Vec<u8>,
}

impl Node {
    pub fn new(op_type: &str, inputs: &[&str], outputs: &[&str]) -> Node {
        Node {
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: &str) -> Node {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_attr(mut self, name: &str, value: AttrValue) -> Node {
        self.set_attr(name, value);
        self
    }

    /// Return a name for this node to use in diagnostics.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => self.outputs.first().map(|s| s.as_str()).unwrap_or(&self.op_type),
        }
    }

    /// Return true if this node is an operator from the default ONNX domain.
    pub fn is_default_domain(&self) -> bool {
        matches!(self.domain.as_deref(), None | Some("") | Some("ai.onnx"))
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    pub fn set_attr(&mut self, name: &str, value: AttrValue) {
        if let Some(attr) = self.attributes.iter_mut().find(|a| a.name == name) {
            attr.value = value;
        } else {
            self.attributes.push(Attribute::new(name, value));
        }
    }

    /// Return the non-empty input names.
    pub fn present_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|s| s.as_str()).filter(|s| !s.is_empty())
    }

    /// Return the non-empty output names.
    pub fn present_outputs(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|s| s.as_str()).filter(|s| !s.is_empty())
    }

    /// Return the input name at `index`, if present and non-empty.
    pub fn input(&self, index: usize) -> Option<&str> {
        self.inputs
            .get(index)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Iterate over nested graphs in this node's attributes, with the names of
    /// the attributes holding them.
    pub fn subgraphs(&self) -> impl Iterator<Item = (&str, &Graph)> {
        self.attributes.iter().flat_map(|attr| {
            let graphs: Vec<&Graph> = match &attr.value {
                AttrValue::Graph(g) => vec![g.as_ref()],
                AttrValue::Graphs(gs) => gs.iter().collect(),
                _ => Vec::new(),
            };
            graphs.into_iter().map(move |g| (attr.name.as_str(), g))
        })
    }

    /// Mutable version of [`subgraphs`](Node::subgraphs).
    pub fn subgraphs_mut(&mut self) -> impl Iterator<Item = (&str, &mut Graph)> {
        self.attributes.iter_mut().flat_map(|attr| {
            let name = attr.name.as_str();
            let graphs: Vec<&mut Graph> = match &mut attr.value {
                AttrValue::Graph(g) => vec![g.as_mut()],
                AttrValue::Graphs(gs) => gs.iter_mut().collect(),
                _ => Vec::new(),
            };
            graphs.into_iter().map(move |g| (name, g))
        })
    }

    pub fn has_subgraphs(&self) -> bool {
        self.subgraphs().next().is_some()
    }

    /// Return all values this node reads, including values captured by its
    /// subgraphs from enclosing scopes.
    pub fn all_inputs(&self) -> Vec<&str> {
        let mut inputs: Vec<&str> = self.present_inputs().collect();
        for (_, g) in self.subgraphs() {
            for name in g.captures() {
                if !inputs.contains(&name) {
                    inputs.push(name);
                }
            }
        }
        inputs
    }

    /// Return true if `self` and `other` apply the same operator, with the
    /// same attributes, to the same inputs.
    ///
    /// Output names are not compared.
    pub fn same_computation(&self, other: &Node) -> bool {
        if self.op_type != other.op_type
            || self.is_default_domain() != other.is_default_domain()
            || (!self.is_default_domain() && self.domain != other.domain)
            || self.inputs != other.inputs
            || self.outputs.len() != other.outputs.len()
            || self.attributes.len() != other.attributes.len()
        {
            return false;
        }
        fn encoded_attrs(node: &Node) -> Vec<(&str, Vec<u8>)> {
            let mut attrs: Vec<(&str, Vec<u8>)> = node
                .attributes
                .iter()
                .map(|a| (a.name.as_str(), a.to_proto().encode()))
                .collect();
            attrs.sort();
            attrs
        }
        encoded_attrs(self) == encoded_attrs(other)
    }

    fn from_proto(proto: &onnx::NodeProto) -> Result<Node, SimplifyError> {
        let op_type = proto
            .op_type
            .clone()
            .filter(|op| !op.is_empty())
            .ok_or_else(|| {
                SimplifyError::MalformedGraph(format!(
                    "node \"{}\" has no operator type",
                    proto.name.as_deref().unwrap_or_default()
                ))
            })?;
        Ok(Node {
            name: proto.name.clone(),
            op_type,
            domain: proto.domain.clone(),
            inputs: proto.input.clone(),
            outputs: proto.output.clone(),
            attributes: proto
                .attribute
                .iter()
                .map(Attribute::from_proto)
                .collect::<Result<_, _>>()?,
            doc_string: proto.doc_string.clone(),
            unknown: proto.unknown.clone(),
        })
    }

    fn to_proto(&self) -> onnx::NodeProto {
        onnx::NodeProto {
            input: self.inputs.clone(),
            output: self.outputs.clone(),
            name: self.name.clone(),
            op_type: Some(self.op_type.clone()),
            attribute: self.attributes.iter().map(|a| a.to_proto()).collect(),
            doc_string: self.doc_string.clone(),
            domain: self.domain.clone(),
            unknown: self.unknown.clone(),
        }
    }
}

/// Declared type and shape of a graph input, output or intermediate value.
#[derive(Clone, Debug)]
pub struct ValueInfo {
    pub name: String,
    pub dtype: Option<DataType>,
    /// Dimensions, or `None` if the rank is unknown.
    pub shape: Option<Vec<Dim>>,
    source: Option<onnx::ValueInfoProto>,
}

impl PartialEq for ValueInfo {
    fn eq(&self, other: &ValueInfo) -> bool {
        self.name == other.name && self.dtype == other.dtype && self.shape == other.shape
    }
}

impl ValueInfo {
    pub fn new(name: &str, dtype: Option<DataType>, shape: Option<Vec<Dim>>) -> ValueInfo {
        ValueInfo {
            name: name.to_string(),
            dtype,
            shape,
            source: None,
        }
    }

    pub fn from_proto(proto: &onnx::ValueInfoProto) -> ValueInfo {
        let tensor_type = proto.r#type.as_ref().and_then(|t| t.tensor_type.as_ref());
        let dtype = tensor_type
            .and_then(|t| t.elem_type)
            .and_then(DataType::from_onnx);
        let shape = tensor_type
            .and_then(|t| t.shape.as_ref())
            .map(|s| s.dim.iter().map(Dim::from_proto).collect());
        ValueInfo {
            name: proto.name.clone().unwrap_or_default(),
            dtype,
            shape,
            source: Some(proto.clone()),
        }
    }

    /// Encode this value info.
    ///
    /// If the type and shape are unchanged since decoding, the original
    /// message is returned.
    pub fn to_proto(&self) -> onnx::ValueInfoProto {
        if let Some(source) = &self.source {
            if ValueInfo::from_proto(source) == *self {
                return source.clone();
            }
        }

        let (doc_string, denotation) = self
            .source
            .as_ref()
            .map(|s| {
                (
                    s.doc_string.clone(),
                    s.r#type.as_ref().and_then(|t| t.denotation.clone()),
                )
            })
            .unwrap_or_default();

        onnx::ValueInfoProto {
            name: Some(self.name.clone()),
            r#type: Some(onnx::TypeProto {
                tensor_type: Some(onnx::TypeProtoTensor {
                    elem_type: self.dtype.map(|dt| dt.to_onnx()),
                    shape: self.shape.as_ref().map(|dims| onnx::TensorShapeProto {
                        dim: dims.iter().map(|d| d.to_proto()).collect(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                denotation,
                ..Default::default()
            }),
            doc_string,
            ..Default::default()
        }
    }
}

/// Named constant tensor in a graph.
#[derive(Clone, Debug)]
pub struct Initializer {
    pub name: String,
    pub value: Arc<Tensor>,
}

/// Computation graph.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    pub name: Option<String>,
    pub doc_string: Option<String>,
    pub nodes: Vec<Node>,
    pub initializers: Vec<Initializer>,
    pub inputs: Vec<ValueInfo>,
    pub outputs: Vec<ValueInfo>,
    pub value_info: Vec<ValueInfo>,
    unknown: Vec<u8>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    /// Build a graph from a decoded `GraphProto`.
    ///
    /// This converts the message into the in-memory representation but does
    /// not check references between nodes. Use [`validate`](Graph::validate)
    /// for that.
    pub fn from_proto(proto: &onnx::GraphProto) -> Result<Graph, SimplifyError> {
        let nodes = proto
            .node
            .iter()
            .map(Node::from_proto)
            .collect::<Result<Vec<_>, _>>()?;
        let initializers = proto
            .initializer
            .iter()
            .map(|t| {
                let name = t.name.clone().filter(|n| !n.is_empty()).ok_or_else(|| {
                    SimplifyError::MalformedGraph("initializer has no name".to_string())
                })?;
                Ok(Initializer {
                    name,
                    value: Arc::new(Tensor::from_proto(t)?),
                })
            })
            .collect::<Result<Vec<_>, SimplifyError>>()?;

        Ok(Graph {
            name: proto.name.clone(),
            doc_string: proto.doc_string.clone(),
            nodes,
            initializers,
            inputs: proto.input.iter().map(ValueInfo::from_proto).collect(),
            outputs: proto.output.iter().map(ValueInfo::from_proto).collect(),
            value_info: proto.value_info.iter().map(ValueInfo::from_proto).collect(),
            unknown: proto.unknown.clone(),
        })
    }

    pub fn to_proto(&self) -> onnx::GraphProto {
        onnx::GraphProto {
            node: self.nodes.iter().map(|n| n.to_proto()).collect(),
            name: self.name.clone(),
            initializer: self
                .initializers
                .iter()
                .map(|init| init.value.to_proto(Some(&init.name)))
                .collect(),
            doc_string: self.doc_string.clone(),
            input: self.inputs.iter().map(|v| v.to_proto()).collect(),
            output: self.outputs.iter().map(|v| v.to_proto()).collect(),
            value_info: self.value_info.iter().map(|v| v.to_proto()).collect(),
            unknown: self.unknown.clone(),
        }
    }

    /// Add a node and return its index.
    pub fn add_node(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Add or replace an initializer.
    pub fn set_initializer(&mut self, name: &str, value: Arc<Tensor>) {
        if let Some(init) = self.initializers.iter_mut().find(|i| i.name == name) {
            init.value = value;
        } else {
            self.initializers.push(Initializer {
                name: name.to_string(),
                value,
            });
        }
    }

    pub fn initializer(&self, name: &str) -> Option<&Arc<Tensor>> {
        self.initializers
            .iter()
            .find(|i| i.name == name)
            .map(|i| &i.value)
    }

    pub fn is_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|i| i.name == name)
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o.name == name)
    }

    /// Return the graph inputs which are not also initializers.
    ///
    /// Models with IR version < 4 list initializers as graph inputs too.
    pub fn runtime_inputs(&self) -> impl Iterator<Item = &ValueInfo> {
        self.inputs
            .iter()
            .filter(|i| self.initializer(&i.name).is_none())
    }

    /// Return a map of value name to the index of the node which produces it.
    pub fn producers(&self) -> FxHashMap<&str, usize> {
        let mut producers = FxHashMap::default();
        for (i, node) in self.nodes.iter().enumerate() {
            for output in node.present_outputs() {
                producers.insert(output, i);
            }
        }
        producers
    }

    /// Return the index of the node which produces `name`.
    pub fn producer(&self, name: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.present_outputs().any(|o| o == name))
    }

    /// Return the indices of nodes which read the value `name`, either as a
    /// direct input or via a capture in a subgraph.
    pub fn successors(&self, name: &str) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.all_inputs().contains(&name))
            .map(|(i, _)| i)
            .collect()
    }

    /// Return the indices of nodes which produce the inputs of the node at
    /// `node_idx`, in input order and without duplicates.
    pub fn predecessors(&self, node_idx: usize) -> Vec<usize> {
        let producers = self.producers();
        let mut preds = Vec::new();
        for input in self.nodes[node_idx].all_inputs() {
            if let Some(&p) = producers.get(input) {
                if !preds.contains(&p) {
                    preds.push(p);
                }
            }
        }
        preds
    }

    /// Return the number of uses of each value by nodes (including subgraph
    /// captures) and graph outputs.
    pub fn use_counts(&self) -> FxHashMap<&str, usize> {
        let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
        for node in &self.nodes {
            for input in node.all_inputs() {
                *counts.entry(input).or_default() += 1;
            }
        }
        for output in &self.outputs {
            *counts.entry(output.name.as_str()).or_default() += 1;
        }
        counts
    }

    /// Return names that are read in this graph or its subgraphs but not
    /// defined in them, ie. values captured from enclosing scopes.
    pub fn captures(&self) -> Vec<&str> {
        let mut defined: FxHashSet<&str> = FxHashSet::default();
        defined.extend(self.inputs.iter().map(|i| i.name.as_str()));
        defined.extend(self.initializers.iter().map(|i| i.name.as_str()));
        for node in &self.nodes {
            defined.extend(node.present_outputs());
        }

        let mut captures = Vec::new();

        for node in &self.nodes {
            for input in node.all_inputs() {
                if !defined.contains(input) && !captures.contains(&input) {
                    captures.push(input);
                }
            }
        }
        for output in &self.outputs {
            let name = output.name.as_str();
            if !defined.contains(name) && !captures.contains(&name) {
                captures.push(name);
            }
        }
        captures
    }

    /// Return the indices of nodes in a topological order.
    ///
    /// Among nodes whose dependencies are satisfied, the one that appears
    /// first in the node list is chosen, so an already-sorted graph keeps its
    /// order. Nested graphs are not considered, other than through the values
    /// they capture.
    pub fn topological_order(&self) -> Result<Vec<usize>, SimplifyError> {
        let producers = self.producers();
        let mut pending: Vec<usize> = vec![0; self.nodes.len()];
        let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];

        for (i, node) in self.nodes.iter().enumerate() {
            for input in node.all_inputs() {
                if let Some(&p) = producers.get(input) {
                    if p == i {
                        return Err(SimplifyError::CyclicGraph(node.display_name().to_string()));
                    }
                    pending[i] += 1;
                    consumers[p].push(i);
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &c in &consumers[i] {
                pending[c] -= 1;
                if pending[c] == 0 {
                    ready.push(Reverse(c));
                }
            }
        }

        if order.len() < self.nodes.len() {
            let stuck = (0..self.nodes.len())
                .find(|i| pending[*i] > 0)
                .map(|i| self.nodes[i].display_name().to_string())
                .unwrap_or_default();
            return Err(SimplifyError::CyclicGraph(stuck));
        }
        Ok(order)
    }

    /// Re-order nodes topologically.
    pub fn sort_topologically(&mut self) -> Result<(), SimplifyError> {
        let order = self.topological_order()?;
        if order.iter().enumerate().all(|(i, idx)| i == *idx) {
            return Ok(());
        }
        let mut nodes: Vec<Option<Node>> = std::mem::take(&mut self.nodes)
            .into_iter()
            .map(Some)
            .collect();
        self.nodes = order.into_iter().filter_map(|i| nodes[i].take()).collect();
        Ok(())
    }

    /// Replace the node at `node_idx` with `new_nodes`.
    ///
    /// Every output of the old node which is still read by another node or
    /// is a graph output must be produced by one of the new nodes. If not,
    /// the graph is left unchanged and an error is returned.
    pub fn replace_node(&mut self, node_idx: usize, new_nodes: Vec<Node>) -> Result<(), SimplifyError> {
        let old = &self.nodes[node_idx];
        let new_outputs: FxHashSet<&str> = new_nodes.iter().flat_map(|n| n.present_outputs()).collect();

        for output in old.present_outputs() {
            if new_outputs.contains(output) {
                continue;
            }
            let used_by_node = self
                .nodes
                .iter()
                .enumerate()
                .any(|(i, n)| i != node_idx && n.all_inputs().contains(&output))
                || new_nodes.iter().any(|n| n.all_inputs().contains(&output));
            if used_by_node || self.is_output(output) {
                return Err(SimplifyError::MalformedGraph(format!(
                    "replacing node \"{}\" would remove value \"{}\" which is still used",
                    old.display_name(),
                    output
                )));
            }
        }

        self.nodes.splice(node_idx..node_idx + 1, new_nodes);
        Ok(())
    }

    /// Replace reads of value `old` with reads of `new`, in this graph's
    /// nodes and in nested graphs which capture `old`.
    ///
    /// Graph outputs are not changed.
    pub fn replace_uses(&mut self, old: &str, new: &str) {
        for node in &mut self.nodes {
            for input in node.inputs.iter_mut() {
                if input == old {
                    *input = new.to_string();
                }
            }
            for (_, subgraph) in node.subgraphs_mut() {
                if subgraph.captures().contains(&old) {
                    subgraph.replace_uses(old, new);
                    for output in subgraph.outputs.iter_mut() {
                        if output.name == old {
                            output.name = new.to_string();
                        }
                    }
                }
            }
        }
    }

    /// Rename a value everywhere in this graph: where it is defined, where it
    /// is read, and in the graph's output and value info lists.
    pub fn rename_value(&mut self, old: &str, new: &str) {
        self.replace_uses(old, new);
        for node in &mut self.nodes {
            for output in node.outputs.iter_mut() {
                if output == old {
                    *output = new.to_string();
                }
            }
        }
        for init in &mut self.initializers {
            if init.name == old {
                init.name = new.to_string();
            }
        }
        for info in self
            .inputs
            .iter_mut()
            .chain(self.outputs.iter_mut())
            .chain(self.value_info.iter_mut())
        {
            if info.name == old {
                info.name = new.to_string();
            }
        }
    }

    /// Check the structural invariants of this graph and its subgraphs.
    ///
    /// `outer_scope` contains names visible from enclosing graphs. Checks
    /// are:
    ///
    /// - Every node input resolves to an initializer, graph input, node output
    ///   or outer-scope name.
    /// - No value name is defined twice, including in nested graphs.
    /// - Every graph output is defined.
    /// - Control flow nodes have well-formed subgraphs.
    pub fn validate(&self, outer_scope: &FxHashSet<String>) -> Result<(), SimplifyError> {
        let mut defined = FxHashSet::default();
        self.validate_scope(outer_scope, &mut defined)
    }

    fn validate_scope(
        &self,
        outer_scope: &FxHashSet<String>,
        defined_anywhere: &mut FxHashSet<String>,
    ) -> Result<(), SimplifyError> {
        let malformed = |msg: String| Err(SimplifyError::MalformedGraph(msg));

        let mut local: FxHashSet<String> = FxHashSet::default();
        for init in &self.initializers {
            if !local.insert(init.name.clone()) || !defined_anywhere.insert(init.name.clone()) {
                return malformed(format!("value \"{}\" is defined more than once", init.name));
            }
        }
        for input in &self.inputs {
            // Graph inputs may repeat initializer names in older models.
            if local.contains(&input.name) && self.initializer(&input.name).is_some() {
                continue;
            }
            if !local.insert(input.name.clone()) || !defined_anywhere.insert(input.name.clone()) {
                return malformed(format!("value \"{}\" is defined more than once", input.name));
            }
        }
        for node in &self.nodes {
            for output in node.present_outputs() {
                if !local.insert(output.to_string()) || !defined_anywhere.insert(output.to_string()) {
                    return malformed(format!("value \"{}\" is defined more than once", output));
                }
            }
        }

        let visible = |name: &str| local.contains(name) || outer_scope.contains(name);

        for node in &self.nodes {
            for input in node.present_inputs() {
                if !visible(input) {
                    return malformed(format!(
                        "node \"{}\" reads undefined value \"{}\"",
                        node.display_name(),
                        input
                    ));
                }
            }
            validate_control_flow(node)?;

            if node.has_subgraphs() {
                let mut inner_scope = outer_scope.clone();
                inner_scope.extend(local.iter().cloned());
                for (_, subgraph) in node.subgraphs() {
                    subgraph.validate_scope(&inner_scope, defined_anywhere)?;
                }
            }
        }

        for output in &self.outputs {
            if !visible(&output.name) {
                return malformed(format!("graph output \"{}\" is not defined", output.name));
            }
        }
        Ok(())
    }

    /// Return the total number of nodes, including nodes in subgraphs.
    pub fn total_node_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| 1 + n.subgraphs().map(|(_, g)| g.total_node_count()).sum::<usize>())
            .sum()
    }

    /// Count nodes by operator type, including nodes in subgraphs.
    pub fn op_counts(&self) -> FxHashMap<String, usize> {
        let mut counts = FxHashMap::default();
        self.count_ops(&mut counts);
        counts
    }

    fn count_ops(&self, counts: &mut FxHashMap<String, usize>) {
        for node in &self.nodes {
            *counts.entry(node.op_type.clone()).or_default() += 1;
            for (_, g) in node.subgraphs() {
                g.count_ops(counts);
            }
        }
    }
}

/// Check the subgraph arity of `If` and `Loop` nodes.
fn validate_control_flow(node: &Node) -> Result<(), SimplifyError> {
    if !node.is_default_domain() {
        return Ok(());
    }
    let malformed = |msg: &str| {
        Err(SimplifyError::MalformedGraph(format!(
            "{} node \"{}\": {}",
            node.op_type,
            node.display_name(),
            msg
        )))
    };
    let graph_attr = |name: &str| match node.attr(name) {
        Some(AttrValue::Graph(g)) => Some(g.as_ref()),
        _ => None,
    };

    match node.op_type.as_str() {
        "If" => {
            let (Some(then_branch), Some(else_branch)) =
                (graph_attr("then_branch"), graph_attr("else_branch"))
            else {
                return malformed("missing branch subgraph");
            };
            let n_outputs = node.outputs.len();
            if then_branch.outputs.len() != n_outputs || else_branch.outputs.len() != n_outputs {
                return malformed("branch output count does not match node output count");
            }
            if !then_branch.inputs.is_empty() || !else_branch.inputs.is_empty() {
                return malformed("branch subgraphs must not have inputs");
            }
        }
        "Loop" => {
            let Some(body) = graph_attr("body") else {
                return malformed("missing body subgraph");
            };
            // Inputs are (max_trip_count, cond, v_initial...). Body inputs are
            // (iteration_num, cond, v...) and outputs are (cond, v..., scan...).
            let n_carried = node.inputs.len().saturating_sub(2);
            if body.inputs.len() != n_carried + 2 {
                return malformed("body input count does not match loop-carried values");
            }
            if body.outputs.len() < n_carried + 1
                || body.outputs.len() - 1 != node.outputs.len()
            {
                return malformed("body output count does not match node outputs");
            }
        }
        _ => {}
    }
    Ok(())
}
