//! Parameter groups with their own learning rates.

use burn::optim::GradientsParams;
use burn::prelude::*;

use cl_io::ParameterCounts;

use crate::config::{matches_any, OptimConfig};
use crate::error::Result;
use crate::model::NamedParam;

use super::grad;

/// Parameters sharing a base learning rate.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGroup {
    /// Group name, used for logging.
    pub name: &'static str,
    /// Learning rate before scheduling.
    pub base_lr: f64,
    /// Members.
    pub params: Vec<NamedParam>,
}

/// Partition of a network's parameters.
///
/// A parameter belongs to `backbone` when its name contains a backbone
/// keyword, else to `linear_proj` when it contains a linear-projection
/// keyword, else to `default`. The `linear_proj` group exists only when some
/// parameter name matches.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGroups {
    groups: Vec<ParamGroup>,
}

impl ParamGroups {
    /// Partition `params` according to `config`.
    pub fn new(params: &[NamedParam], config: &OptimConfig) -> Self {
        let mut default = Vec::new();
        let mut backbone = Vec::new();
        let mut linear_proj = Vec::new();
        for p in params {
            if matches_any(&p.name, &config.backbone_keywords) {
                backbone.push(p.clone());
            } else if matches_any(&p.name, &config.linear_proj_keywords) {
                linear_proj.push(p.clone());
            } else {
                default.push(p.clone());
            }
        }

        let mut groups = vec![
            ParamGroup {
                name: "default",
                base_lr: config.lr,
                params: default,
            },
            ParamGroup {
                name: "backbone",
                base_lr: config.lr_backbone,
                params: backbone,
            },
        ];
        if !linear_proj.is_empty() {
            groups.push(ParamGroup {
                name: "linear_proj",
                base_lr: config.lr * config.lr_linear_proj_mult,
                params: linear_proj,
            });
        }
        Self { groups }
    }

    /// Groups in order.
    pub fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Always false; `default` and `backbone` always exist.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Base learning rate per group, in order.
    pub fn base_lrs(&self) -> Vec<f64> {
        self.groups.iter().map(|g| g.base_lr).collect()
    }

    /// Group names, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.groups.iter().map(|g| g.name).collect()
    }

    /// Split `grads` into one container per group, in group order.
    pub fn split<B: Backend>(&self, mut grads: GradientsParams) -> Result<Vec<GradientsParams>> {
        self.groups
            .iter()
            .map(|g| grad::extract::<B>(&mut grads, &g.params))
            .collect()
    }
}

/// Parameter counts by keyword, for run metadata.
pub fn count_parameters(params: &[NamedParam], config: &OptimConfig) -> ParameterCounts {
    let count = |keywords: &[String]| -> usize {
        params
            .iter()
            .filter(|p| matches_any(&p.name, keywords))
            .map(NamedParam::numel)
            .sum()
    };
    ParameterCounts {
        num_params: params.iter().map(NamedParam::numel).sum(),
        num_backbone_params: count(&config.count_backbone_keywords),
        num_neck_params: count(&config.count_neck_keywords),
        num_head_params: count(&config.count_head_keywords),
    }
}
