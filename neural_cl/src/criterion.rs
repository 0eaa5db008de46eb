//! Criterion contract and loss dictionaries.

use std::collections::BTreeMap;

use burn::prelude::*;

use cl_core::LossKey;

use crate::error::Result;
use crate::model::{read_scalar, NetworkOutput, TargetTensors};

/// Loss terms keyed by [`LossKey`].
#[derive(Debug, Clone)]
pub struct LossDict<B: Backend> {
    terms: BTreeMap<LossKey, Tensor<B, 1>>,
}

impl<B: Backend> Default for LossDict<B> {
    fn default() -> Self {
        Self {
            terms: BTreeMap::new(),
        }
    }
}

impl<B: Backend> LossDict<B> {
    /// Empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a term.
    pub fn insert(&mut self, key: impl Into<LossKey>, value: Tensor<B, 1>) {
        self.terms.insert(key.into(), value);
    }

    /// Add `value` to an existing term, or insert it.
    pub fn accumulate(&mut self, key: impl Into<LossKey>, value: Tensor<B, 1>) {
        let key = key.into();
        let merged = match self.terms.remove(&key) {
            Some(existing) => existing + value,
            None => value,
        };
        self.terms.insert(key, merged);
    }

    /// Term by key.
    pub fn get(&self, key: &LossKey) -> Option<&Tensor<B, 1>> {
        self.terms.get(key)
    }

    /// Remove a term.
    pub fn remove(&mut self, key: &LossKey) -> Option<Tensor<B, 1>> {
        self.terms.remove(key)
    }

    /// Remove every diagnostic (never optimized) term and return the first.
    pub fn take_diagnostic(&mut self) -> Option<Tensor<B, 1>> {
        let keys: Vec<LossKey> = self
            .terms
            .keys()
            .filter(|k| k.is_diagnostic())
            .cloned()
            .collect();
        keys.into_iter().filter_map(|k| self.terms.remove(&k)).next()
    }

    /// Number of terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// True if no term is present.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Terms in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&LossKey, &Tensor<B, 1>)> {
        self.terms.iter()
    }

    /// Unweighted sum of all terms, or `None` when empty.
    pub fn sum(&self) -> Option<Tensor<B, 1>> {
        self.terms
            .values()
            .cloned()
            .reduce(|acc, v| acc + v)
    }

    /// Host values of all terms.
    pub fn to_host(&self) -> Result<BTreeMap<LossKey, f64>> {
        self.terms
            .iter()
            .map(|(k, v)| Ok((k.clone(), read_scalar(v.clone())?)))
            .collect()
    }
}

impl<B: Backend> IntoIterator for LossDict<B> {
    type Item = (LossKey, Tensor<B, 1>);
    type IntoIter = std::collections::btree_map::IntoIter<LossKey, Tensor<B, 1>>;

    fn into_iter(self) -> Self::IntoIter {
        self.terms.into_iter()
    }
}

impl<B: Backend, K: Into<LossKey>> FromIterator<(K, Tensor<B, 1>)> for LossDict<B> {
    fn from_iter<I: IntoIterator<Item = (K, Tensor<B, 1>)>>(iter: I) -> Self {
        let mut dict = Self::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

/// Batch-level facts the criterion may condition on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CriterionContext {
    /// Current epoch.
    pub epoch: usize,
    /// The batch is a mixed class-only / fully-labelled pair.
    pub mixed_pair: bool,
    /// The batch is a single class-only sample.
    pub single_sample: bool,
}

/// What a criterion evaluation yields.
#[derive(Debug, Clone)]
pub struct CriterionOutput<B: Backend> {
    /// Loss terms, possibly including the `hd95` diagnostic.
    pub losses: LossDict<B>,
    /// Matched query indices per sample.
    pub positive_queries: Vec<Vec<usize>>,
}

impl<B: Backend> CriterionOutput<B> {
    /// Output without matching information.
    pub fn from_losses(losses: LossDict<B>) -> Self {
        Self {
            losses,
            positive_queries: Vec::new(),
        }
    }
}

/// Detection (and optional segmentation) loss.
pub trait Criterion<B: Backend> {
    /// True when the criterion reports a segmentation Hausdorff proxy.
    fn seg_proxy(&self) -> bool {
        false
    }

    /// Evaluate the losses of `output` against per-sample targets.
    fn compute(
        &self,
        output: &NetworkOutput<B>,
        targets: &[TargetTensors<B>],
        segmentation: Option<&Tensor<B, 5>>,
        ctx: &CriterionContext,
    ) -> Result<CriterionOutput<B>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    fn scalar(v: f32) -> Tensor<TestBackend, 1> {
        Tensor::from_floats([v], &Default::default())
    }

    #[test]
    fn test_accumulate_adds() {
        let mut dict = LossDict::new();
        dict.accumulate("bbox_one2many", scalar(1.0));
        dict.accumulate("bbox_one2many", scalar(2.5));
        let host = dict.to_host().unwrap();
        assert_eq!(host[&LossKey::parse("bbox_one2many")], 3.5);
    }

    #[test]
    fn test_take_diagnostic_removes_hd95() {
        let mut dict: LossDict<TestBackend> =
            [("bbox", scalar(1.0)), ("hd95", scalar(7.0))].into_iter().collect();
        let hd = dict.take_diagnostic().unwrap();
        assert_eq!(read_scalar(hd).unwrap(), 7.0);
        assert_eq!(dict.len(), 1);
        assert!(dict.take_diagnostic().is_none());
    }

    #[test]
    fn test_sum() {
        let dict: LossDict<TestBackend> =
            [("cls", scalar(1.0)), ("giou", scalar(2.0))].into_iter().collect();
        assert_eq!(read_scalar(dict.sum().unwrap()).unwrap(), 3.0);
        assert!(LossDict::<TestBackend>::new().sum().is_none());
    }
}
