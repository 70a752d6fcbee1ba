use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::tensor::Tensor;

/// An environment from which subgraphs can resolve captured values.
///
/// Subgraphs used by control flow operators (`If`, `Loop`) may read values
/// from enclosing graphs by name, like a captured value in a Rust closure. A
/// `CaptureEnv` is passed to the subgraph when it is executed or folded and
/// used to resolve these names.
///
/// `CaptureEnv`s are arranged in a hierarchy. Lookups try this environment's
/// values first, then the parent environment and so on.
#[derive(Clone, Copy)]
pub struct CaptureEnv<'a> {
    parent: Option<&'a CaptureEnv<'a>>,
    values: Option<&'a FxHashMap<String, Arc<Tensor>>>,
}

impl<'a> CaptureEnv<'a> {
    /// Create a capture environment with values from `values`, falling back
    /// to `parent`.
    pub fn new(
        parent: Option<&'a CaptureEnv<'a>>,
        values: &'a FxHashMap<String, Arc<Tensor>>,
    ) -> CaptureEnv<'a> {
        CaptureEnv {
            parent,
            values: Some(values),
        }
    }

    /// Create an empty capture environment which will return `None` for all
    /// lookups.
    pub fn empty() -> Self {
        CaptureEnv {
            parent: None,
            values: None,
        }
    }

    /// Return a new capture environment which has `self` as a parent and no
    /// values of its own.
    pub fn child(&self) -> CaptureEnv<'_> {
        CaptureEnv {
            parent: Some(self),
            values: None,
        }
    }

    /// Look up a value by name in this environment or its ancestors.
    pub fn get(&self, name: &str) -> Option<&'a Arc<Tensor>> {
        if let Some(value) = self.values.and_then(|values| values.get(name)) {
            return Some(value);
        }
        self.parent.and_then(|parent| parent.get(name))
    }

    /// Return true if `name` can be resolved in this environment.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rustc_hash::FxHashMap;

    use super::CaptureEnv;
    use crate::tensor::Tensor;

    #[test]
    fn test_lookup_falls_back_to_parent() {
        let mut outer = FxHashMap::default();
        outer.insert("a".to_string(), Arc::new(Tensor::from_scalar(1.0f32)));
        outer.insert("b".to_string(), Arc::new(Tensor::from_scalar(2.0f32)));
        let mut inner = FxHashMap::default();
        inner.insert("b".to_string(), Arc::new(Tensor::from_scalar(3.0f32)));

        let outer_env = CaptureEnv::new(None, &outer);
        let inner_env = CaptureEnv::new(Some(&outer_env), &inner);
        let child = inner_env.child();

        assert_eq!(child.get("a").and_then(|t| t.item::<f32>()), Some(1.0));
        assert_eq!(child.get("b").and_then(|t| t.item::<f32>()), Some(3.0));
        assert!(child.get("c").is_none());
        assert!(!CaptureEnv::empty().contains("a"));
    }
}
