//! Frozen reference models.
//!
//! The auxiliary and previous-stage models run on the inner backend and
//! never receive gradients. Their outputs enter the autodiff graph as
//! constants.

use std::marker::PhantomData;

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::model::{DetectionNetwork, NetworkOutput};

/// A model whose predictions contribute a loss term without being trained.
pub trait ScoringModel<B: Backend> {
    /// Predictions for `volume`, detached from any graph.
    fn score(&self, volume: &Tensor<B, 5>) -> NetworkOutput<B>;
}

/// Inference-only copy of a detection network.
#[derive(Debug, Clone)]
pub struct FrozenModel<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    inner: M::InnerModule,
    _backend: PhantomData<B>,
}

impl<B, M> FrozenModel<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    M::InnerModule: DetectionNetwork<B::InnerBackend>,
{
    /// Freeze an inner-backend network.
    pub fn new(inner: M::InnerModule) -> Self {
        Self {
            inner,
            _backend: PhantomData,
        }
    }

    /// The wrapped network.
    pub fn network(&self) -> &M::InnerModule {
        &self.inner
    }
}

impl<B, M> ScoringModel<B> for FrozenModel<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    M::InnerModule: DetectionNetwork<B::InnerBackend>,
{
    fn score(&self, volume: &Tensor<B, 5>) -> NetworkOutput<B> {
        NetworkOutput::from_inner(self.inner.forward(volume.clone().inner(), None, 0))
    }
}
