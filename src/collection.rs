//! Lazily flattened collection of experiments.
//!
//! Sources are accumulated without being evaluated, since expanding some of
//! them (listing a directory of inputs, for instance) is work we do not
//! always want to do. The first traversal flattens every pending source, in
//! insertion order, and the result is kept for later traversals.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::experiment::Experiment;

/// Deferred producer of experiments
pub trait ExperimentSource {
    /// Produce the nodes of this source. Called at most once.
    fn expand(self: Box<Self>) -> Result<Vec<ExperimentNode>>;
}

impl<F> ExperimentSource for F
where
    F: FnOnce() -> Result<Vec<ExperimentNode>>,
{
    fn expand(self: Box<Self>) -> Result<Vec<ExperimentNode>> {
        (*self)()
    }
}

/// A possibly nested, possibly deferred group of experiments
pub enum ExperimentNode {
    Single(Arc<Experiment>),
    Group(Vec<ExperimentNode>),
    Lazy(Box<dyn ExperimentSource>),
}

impl ExperimentNode {
    /// Wrap a deferred source.
    pub fn source(source: impl ExperimentSource + 'static) -> Self {
        ExperimentNode::Lazy(Box::new(source))
    }

    /// Wrap a closure that produces nodes when first traversed.
    pub fn lazy<F>(produce: F) -> Self
    where
        F: FnOnce() -> Result<Vec<ExperimentNode>> + 'static,
    {
        ExperimentNode::Lazy(Box::new(produce))
    }
}

impl fmt::Debug for ExperimentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExperimentNode::Single(exp) => f.debug_tuple("Single").field(&exp.name()).finish(),
            ExperimentNode::Group(nodes) => f.debug_tuple("Group").field(nodes).finish(),
            ExperimentNode::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

impl From<Experiment> for ExperimentNode {
    fn from(experiment: Experiment) -> Self {
        ExperimentNode::Single(Arc::new(experiment))
    }
}

impl From<Arc<Experiment>> for ExperimentNode {
    fn from(experiment: Arc<Experiment>) -> Self {
        ExperimentNode::Single(experiment)
    }
}

impl<T: Into<ExperimentNode>> From<Vec<T>> for ExperimentNode {
    fn from(nodes: Vec<T>) -> Self {
        ExperimentNode::Group(nodes.into_iter().map(Into::into).collect())
    }
}

type Predicate = Box<dyn Fn(&Experiment) -> bool>;

/// Ordered, filterable sequence of experiments built from lazy sources
#[derive(Default)]
pub struct ExperimentCollection {
    pending: Vec<ExperimentNode>,
    flat: Vec<Arc<Experiment>>,
    filter: Option<Predicate>,
}

impl fmt::Debug for ExperimentCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentCollection")
            .field("pending", &self.pending.len())
            .field("flat", &self.flat.len())
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl ExperimentCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add experiments without evaluating them.
    pub fn push(&mut self, node: impl Into<ExperimentNode>) {
        self.pending.push(node.into());
    }

    /// Add a deferred source.
    pub fn push_source(&mut self, source: impl ExperimentSource + 'static) {
        self.pending.push(ExperimentNode::source(source));
    }

    /// Add a closure producing experiments on first traversal.
    pub fn push_lazy<F>(&mut self, produce: F)
    where
        F: FnOnce() -> Result<Vec<ExperimentNode>> + 'static,
    {
        self.pending.push(ExperimentNode::lazy(produce));
    }

    /// Restrict traversal to experiments matching the predicate. The
    /// flattened sequence itself is left untouched.
    pub fn set_filter(&mut self, filter: impl Fn(&Experiment) -> bool + 'static) {
        self.filter = Some(Box::new(filter));
    }

    pub fn clear_filter(&mut self) {
        self.filter = None;
    }

    /// Returns true if some sources have not been expanded yet.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Expand all pending sources into the flat sequence.
    fn flatten(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        // Depth-first with an explicit stack of iterators keeps insertion order.
        let mut stack = vec![pending.into_iter()];
        while let Some(top) = stack.last_mut() {
            match top.next() {
                None => {
                    stack.pop();
                }
                Some(ExperimentNode::Single(exp)) => self.flat.push(exp),
                Some(ExperimentNode::Group(nodes)) => stack.push(nodes.into_iter()),
                Some(ExperimentNode::Lazy(source)) => stack.push(source.expand()?.into_iter()),
            }
        }
        Ok(())
    }

    /// Traverse the experiments that pass the filter, in order.
    pub fn iter(&mut self) -> Result<impl Iterator<Item = &Arc<Experiment>> + '_> {
        self.flatten()?;
        let filter = self.filter.as_deref();
        Ok(self
            .flat
            .iter()
            .filter(move |exp| filter.is_none_or(|keep| keep(exp))))
    }

    /// Owned handles to the experiments that pass the filter
    pub fn to_vec(&mut self) -> Result<Vec<Arc<Experiment>>> {
        Ok(self.iter()?.cloned().collect())
    }

    /// Number of experiments that pass the filter
    pub fn len(&mut self) -> Result<usize> {
        Ok(self.iter()?.count())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenchError;
    use crate::experiment::tests::experiment;
    use std::cell::Cell;
    use std::rc::Rc;

    fn names(collection: &mut ExperimentCollection) -> Vec<String> {
        collection
            .iter()
            .unwrap()
            .map(|e| e.name().to_string())
            .collect()
    }

    #[test]
    fn test_empty_collection() {
        let mut collection = ExperimentCollection::new();
        assert_eq!(collection.len().unwrap(), 0);
        assert!(collection.is_empty().unwrap());
    }

    #[test]
    fn test_nested_groups_flatten_in_order() {
        let mut collection = ExperimentCollection::new();
        collection.push(experiment("a"));
        collection.push(vec![
            ExperimentNode::from(experiment("b")),
            ExperimentNode::from(vec![experiment("c"), experiment("d")]),
        ]);
        collection.push(experiment("e"));
        assert_eq!(names(&mut collection), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_lazy_source_expands_once_on_first_traversal() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let mut collection = ExperimentCollection::new();
        collection.push_lazy(move || {
            counter.set(counter.get() + 1);
            Ok(vec![experiment("x").into(), experiment("y").into()])
        });

        assert_eq!(calls.get(), 0);
        assert!(collection.has_pending());
        assert_eq!(collection.len().unwrap(), 2);
        assert_eq!(names(&mut collection), vec!["x", "y"]);
        assert_eq!(calls.get(), 1);
        assert!(!collection.has_pending());
    }

    #[test]
    fn test_sources_added_later_are_appended() {
        let mut collection = ExperimentCollection::new();
        collection.push(experiment("a"));
        assert_eq!(collection.len().unwrap(), 1);
        collection.push_lazy(|| Ok(vec![experiment("b").into()]));
        assert_eq!(names(&mut collection), vec!["a", "b"]);
    }

    #[test]
    fn test_lazy_inside_group() {
        let mut collection = ExperimentCollection::new();
        collection.push(ExperimentNode::Group(vec![
            experiment("a").into(),
            ExperimentNode::lazy(|| Ok(vec![experiment("b").into()])),
            experiment("c").into(),
        ]));
        assert_eq!(names(&mut collection), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_filter_does_not_mutate_sequence() {
        let mut collection = ExperimentCollection::new();
        collection.push(vec![experiment("keep-1"), experiment("drop"), experiment("keep-2")]);
        collection.set_filter(|e| e.name().starts_with("keep"));
        assert_eq!(names(&mut collection), vec!["keep-1", "keep-2"]);
        assert_eq!(collection.len().unwrap(), 2);

        collection.clear_filter();
        assert_eq!(collection.len().unwrap(), 3);
    }

    #[test]
    fn test_source_error_propagates() {
        let mut collection = ExperimentCollection::new();
        collection.push_lazy(|| Err(BenchError::Source("directory vanished".to_string())));
        assert!(matches!(collection.len(), Err(BenchError::Source(_))));
    }
}
