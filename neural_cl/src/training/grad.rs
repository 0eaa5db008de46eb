//! Gradient post-processing between backward and the optimizer step.
//!
//! Gradients live in a [`GradientsParams`] keyed by parameter id and typed
//! by rank. Every operation here walks the network's named parameters and
//! dispatches on their rank.

use burn::optim::GradientsParams;
use burn::prelude::*;

use cl_core::CoreError;

use crate::error::Result;
use crate::model::{read_scalar, read_values, NamedParam};

/// Added to the norm before computing the clip coefficient.
pub const CLIP_EPSILON: f64 = 1e-6;

/// Outcome of unscaling and clipping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradStats {
    /// Global L2 norm of the unscaled gradients, before clipping.
    pub total_norm: f64,
    /// Multiplier applied for clipping (1 when not clipped).
    pub clip_coef: f64,
}

impl GradStats {
    /// False when the gradients overflowed and the step must be skipped.
    pub fn is_finite(&self) -> bool {
        self.total_norm.is_finite()
    }
}

fn flatten<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> (Tensor<B, 1>, Vec<usize>) {
    let dims = tensor.dims().to_vec();
    let numel: usize = dims.iter().product();
    (tensor.reshape([numel]), dims)
}

/// Remove a parameter's gradient as a flat tensor plus its dims.
fn take_flat<B: Backend>(
    grads: &mut GradientsParams,
    param: &NamedParam,
) -> Result<Option<(Tensor<B, 1>, Vec<usize>)>> {
    let id = param.id.clone();
    let flat = match param.rank() {
        1 => grads.remove::<B, 1>(&id).map(flatten),
        2 => grads.remove::<B, 2>(&id).map(flatten),
        3 => grads.remove::<B, 3>(&id).map(flatten),
        4 => grads.remove::<B, 4>(&id).map(flatten),
        5 => grads.remove::<B, 5>(&id).map(flatten),
        rank => return Err(CoreError::UnsupportedRank { rank }.into()),
    };
    Ok(flat)
}

/// Register a flat gradient under `param`, restoring its dims.
fn put_flat<B: Backend>(
    grads: &mut GradientsParams,
    param: &NamedParam,
    flat: Tensor<B, 1>,
    dims: &[usize],
) -> Result<()> {
    let id = param.id.clone();
    match *dims {
        [a] => grads.register(id, flat.reshape([a])),
        [a, b] => grads.register(id, flat.reshape([a, b])),
        [a, b, c] => grads.register(id, flat.reshape([a, b, c])),
        [a, b, c, d] => grads.register(id, flat.reshape([a, b, c, d])),
        [a, b, c, d, e] => grads.register(id, flat.reshape([a, b, c, d, e])),
        _ => return Err(CoreError::UnsupportedRank { rank: dims.len() }.into()),
    }
    Ok(())
}

/// Global L2 norm over every gradient present in `grads`.
pub fn global_norm<B: Backend>(grads: &mut GradientsParams, params: &[NamedParam]) -> Result<f64> {
    let mut sum_sq: Option<Tensor<B, 1>> = None;
    for param in params {
        if let Some((flat, dims)) = take_flat::<B>(grads, param)? {
            let sq = flat.clone().powf_scalar(2.0).sum();
            sum_sq = Some(match sum_sq {
                Some(acc) => acc + sq,
                None => sq,
            });
            put_flat(grads, param, flat, &dims)?;
        }
    }
    match sum_sq {
        Some(s) => Ok(read_scalar(s)?.sqrt()),
        None => Ok(0.0),
    }
}

/// Multiply every gradient by `factor`.
pub fn scale_grads<B: Backend>(grads: &mut GradientsParams, params: &[NamedParam], factor: f64) -> Result<()> {
    for param in params {
        if let Some((flat, dims)) = take_flat::<B>(grads, param)? {
            put_flat(grads, param, flat.mul_scalar(factor), &dims)?;
        }
    }
    Ok(())
}

/// Undo loss scaling and clip to `max_norm` (0 disables clipping).
///
/// Non-finite gradients are left untouched; the caller skips the step.
pub fn unscale_and_clip<B: Backend>(
    grads: &mut GradientsParams,
    params: &[NamedParam],
    loss_scale: f64,
    max_norm: f64,
) -> Result<GradStats> {
    let inv_scale = 1.0 / loss_scale;
    let total_norm = global_norm::<B>(grads, params)? * inv_scale;
    if !total_norm.is_finite() {
        return Ok(GradStats {
            total_norm,
            clip_coef: 1.0,
        });
    }

    let mut clip_coef = 1.0;
    if max_norm > 0.0 {
        let coef = max_norm / (total_norm + CLIP_EPSILON);
        if coef < 1.0 {
            clip_coef = coef;
        }
    }

    let factor = inv_scale * clip_coef;
    if factor != 1.0 {
        scale_grads::<B>(grads, params, factor)?;
    }
    Ok(GradStats {
        total_norm,
        clip_coef,
    })
}

/// Move the gradients of `params` out of `grads` into a new container.
pub fn extract<B: Backend>(grads: &mut GradientsParams, params: &[NamedParam]) -> Result<GradientsParams> {
    let mut out = GradientsParams::new();
    for param in params {
        if let Some((flat, dims)) = take_flat::<B>(grads, param)? {
            put_flat(&mut out, param, flat, &dims)?;
        }
    }
    Ok(out)
}

/// Host copy of a rank-2 gradient as `(values, rows, cols)`.
pub fn read_matrix<B: Backend>(grads: &GradientsParams, param: &NamedParam) -> Result<Option<(Vec<f32>, usize, usize)>> {
    if param.rank() != 2 {
        return Err(CoreError::RankMismatch {
            expected: 2,
            got: param.rank(),
        }
        .into());
    }
    match grads.get::<B, 2>(&param.id) {
        Some(grad) => {
            let [rows, cols] = grad.dims();
            Ok(Some((read_values(grad)?, rows, cols)))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::module::ParamId;

    type B = burn::backend::NdArray;

    fn param(name: &str, shape: &[usize]) -> NamedParam {
        NamedParam {
            name: name.to_string(),
            id: ParamId::new(),
            shape: shape.to_vec(),
        }
    }

    fn setup() -> (GradientsParams, Vec<NamedParam>) {
        let device = Default::default();
        let a = param("a", &[2]);
        let b = param("b", &[1, 2]);
        let mut grads = GradientsParams::new();
        grads.register(a.id.clone(), Tensor::<B, 1>::from_floats([3.0, 0.0], &device));
        grads.register(b.id.clone(), Tensor::<B, 2>::from_floats([[0.0, 4.0]], &device));
        (grads, vec![a, b])
    }

    #[test]
    fn test_global_norm_spans_ranks() {
        let (mut grads, params) = setup();
        let norm = global_norm::<B>(&mut grads, &params).unwrap();
        assert!((norm - 5.0).abs() < 1e-6);
        assert_eq!(grads.len(), 2);
    }

    #[test]
    fn test_clip_scales_to_max_norm() {
        let (mut grads, params) = setup();
        let stats = unscale_and_clip::<B>(&mut grads, &params, 1.0, 1.0).unwrap();
        assert!((stats.total_norm - 5.0).abs() < 1e-6);
        assert!(stats.clip_coef < 1.0);
        let after = global_norm::<B>(&mut grads, &params).unwrap();
        assert!((after - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_unscale_divides_by_loss_scale() {
        let (mut grads, params) = setup();
        let stats = unscale_and_clip::<B>(&mut grads, &params, 10.0, 0.0).unwrap();
        assert!((stats.total_norm - 0.5).abs() < 1e-6);
        assert_eq!(stats.clip_coef, 1.0);
        let (values, rows, cols) = read_matrix::<B>(&grads, &params[1]).unwrap().unwrap();
        assert_eq!((rows, cols), (1, 2));
        assert!((values[1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_detected() {
        let device = Default::default();
        let a = param("a", &[2]);
        let mut grads = GradientsParams::new();
        grads.register(
            a.id.clone(),
            Tensor::<B, 1>::from_floats([f32::INFINITY, 1.0], &device),
        );
        let stats = unscale_and_clip::<B>(&mut grads, &[a], 1.0, 1.0).unwrap();
        assert!(!stats.is_finite());
    }

    #[test]
    fn test_extract_moves_only_listed() {
        let (mut grads, params) = setup();
        let moved = extract::<B>(&mut grads, &params[..1]).unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(grads.len(), 1);
    }

    #[test]
    fn test_rank_above_five_rejected() {
        let (mut grads, _) = setup();
        let wide = param("w", &[1, 1, 1, 1, 1, 1]);
        assert!(global_norm::<B>(&mut grads, &[wide]).is_err());
    }
}
