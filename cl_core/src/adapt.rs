//! Weight adaptation for grown architectures.
//!
//! When a later continual-learning stage adds output classes, some parameter
//! tensors get larger. The old values are copied into the overlapping leading
//! block of the new tensor along every dimension; everything outside that
//! block keeps the template's existing (freshly initialized) values.
//!
//! ```text
//!   template (a+k, b)        old (a, b)
//!   ┌───────────────┐        ┌───────────┐
//!   │ old[0..a, ..] │ <───── │           │
//!   ├───────────────┤        └───────────┘
//!   │  template     │
//!   └───────────────┘
//! ```

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{CoreError, Result};
use crate::tensor::{HostTensor, StateDict};

/// Highest supported rank: bias, linear, and 1D/2D/3D convolution kernels.
pub const MAX_ADAPT_RANK: usize = 5;

/// Copy the overlapping leading block of `old` into a copy of `template`.
pub fn adapt_weights(old: &HostTensor, template: &HostTensor) -> Result<HostTensor> {
    let rank = old.rank();
    if rank == 0 || rank > MAX_ADAPT_RANK {
        return Err(CoreError::UnsupportedRank { rank });
    }
    if template.rank() != rank {
        return Err(CoreError::RankMismatch {
            expected: template.rank(),
            got: rank,
        });
    }

    let mut out = template.clone();
    let overlap: Vec<usize> = old
        .shape()
        .iter()
        .zip(template.shape())
        .map(|(&a, &b)| a.min(b))
        .collect();
    if overlap.contains(&0) {
        return Ok(out);
    }

    let src_strides = old.strides();
    let dst_strides = template.strides();
    let inner = overlap[rank - 1];
    let outer = &overlap[..rank - 1];
    let mut index = vec![0usize; rank - 1];

    let src = old.values();
    let dst = out.values_mut();
    loop {
        let src_off: usize = index.iter().zip(&src_strides).map(|(i, s)| i * s).sum();
        let dst_off: usize = index.iter().zip(&dst_strides).map(|(i, s)| i * s).sum();
        dst[dst_off..dst_off + inner].copy_from_slice(&src[src_off..src_off + inner]);

        // Odometer over the outer dimensions.
        let mut d = outer.len();
        loop {
            if d == 0 {
                return Ok(out);
            }
            d -= 1;
            index[d] += 1;
            if index[d] < outer[d] {
                break;
            }
            index[d] = 0;
        }
    }
}

/// Result of merging a loaded state dict into a live one.
#[derive(Debug, Clone, Default)]
pub struct AdaptedState {
    /// Complete state dict with the live model's keys and shapes.
    pub state: StateDict,
    /// Keys whose tensors were shape-adapted.
    pub adapted: Vec<String>,
    /// Live keys absent from the loaded dict; template values kept.
    pub missing: Vec<String>,
    /// Loaded keys the live model does not have; dropped.
    pub unexpected: Vec<String>,
}

impl AdaptedState {
    /// True when the loaded dict matched the live one exactly.
    pub fn is_exact(&self) -> bool {
        self.adapted.is_empty() && self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// True if `loaded` has exactly the live keys with identical shapes.
pub fn is_exact_match(loaded: &StateDict, live: &StateDict) -> bool {
    loaded.len() == live.len()
        && live
            .iter()
            .all(|(k, t)| loaded.get(k).is_some_and(|l| l.shape() == t.shape()))
}

enum Resolution {
    Kept(HostTensor),
    Adapted(HostTensor),
    Missing(HostTensor),
}

fn resolve(name: &str, live: &HostTensor, loaded: &StateDict) -> Result<Resolution> {
    match loaded.get(name) {
        Some(old) if old.shape() == live.shape() => Ok(Resolution::Kept(old.clone())),
        Some(old) => adapt_weights(old, live).map(Resolution::Adapted),
        None => Ok(Resolution::Missing(live.clone())),
    }
}

/// Merge `loaded` into the shapes of `live`.
///
/// Matching tensors are taken from `loaded`, mismatched ones adapted, missing
/// ones kept from `live`. Fails if any adaptation hits an unsupported rank.
pub fn adapt_state_dict(loaded: &StateDict, live: &StateDict) -> Result<AdaptedState> {
    #[cfg(feature = "parallel")]
    let resolved: Vec<(String, Result<Resolution>)> = live
        .par_iter()
        .map(|(name, t)| (name.clone(), resolve(name, t, loaded)))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let resolved: Vec<(String, Result<Resolution>)> = live
        .iter()
        .map(|(name, t)| (name.clone(), resolve(name, t, loaded)))
        .collect();

    let mut merged = AdaptedState::default();
    for (name, resolution) in resolved {
        let tensor = match resolution? {
            Resolution::Kept(t) => t,
            Resolution::Adapted(t) => {
                merged.adapted.push(name.clone());
                t
            }
            Resolution::Missing(t) => {
                merged.missing.push(name.clone());
                t
            }
        };
        merged.state.insert(name, tensor);
    }
    merged.unexpected = loaded
        .keys()
        .filter(|k| !live.contains_key(*k))
        .cloned()
        .collect();
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn seq(shape: Vec<usize>, offset: f32) -> HostTensor {
        let n: usize = shape.iter().product();
        HostTensor::new(shape, (0..n).map(|i| i as f32 + offset).collect()).unwrap()
    }

    #[test]
    fn test_grow_rows() {
        let old = seq(vec![2, 3], 0.0);
        let template = HostTensor::full(vec![4, 3], -1.0);
        let out = adapt_weights(&old, &template).unwrap();
        assert_eq!(out.shape(), &[4, 3]);
        assert_eq!(&out.values()[..6], old.values());
        assert!(out.values()[6..].iter().all(|&v| v == -1.0));
    }

    #[test]
    fn test_grow_and_shrink_every_dimension() {
        let old = seq(vec![2, 3, 2], 0.0);
        let template = HostTensor::full(vec![3, 2, 2], -1.0);
        let out = adapt_weights(&old, &template).unwrap();
        // old[i, j, k] = i*6 + j*2 + k
        for i in 0..3 {
            for j in 0..2 {
                for k in 0..2 {
                    let v = out.values()[i * 4 + j * 2 + k];
                    if i < 2 {
                        assert_eq!(v, (i * 6 + j * 2 + k) as f32);
                    } else {
                        assert_eq!(v, -1.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_bias_and_conv3d() {
        let out = adapt_weights(&seq(vec![3], 1.0), &HostTensor::zeros(vec![5])).unwrap();
        assert_eq!(out.values(), &[1.0, 2.0, 3.0, 0.0, 0.0]);

        let old = seq(vec![2, 1, 1, 1, 2], 0.0);
        let out = adapt_weights(&old, &HostTensor::full(vec![3, 1, 1, 1, 2], 9.0)).unwrap();
        assert_eq!(out.values(), &[0.0, 1.0, 2.0, 3.0, 9.0, 9.0]);
    }

    #[test]
    fn test_unsupported_ranks() {
        let scalar = HostTensor::zeros(vec![]);
        assert_eq!(
            adapt_weights(&scalar, &scalar),
            Err(CoreError::UnsupportedRank { rank: 0 })
        );
        let six = HostTensor::zeros(vec![1; 6]);
        assert_eq!(
            adapt_weights(&six, &six),
            Err(CoreError::UnsupportedRank { rank: 6 })
        );
        assert!(matches!(
            adapt_weights(&HostTensor::zeros(vec![2]), &HostTensor::zeros(vec![2, 2])),
            Err(CoreError::RankMismatch { .. })
        ));
    }

    #[test]
    fn test_adapt_state_dict() {
        let mut live = StateDict::new();
        live.insert("head.weight".into(), HostTensor::zeros(vec![4, 2]));
        live.insert("head.bias".into(), HostTensor::zeros(vec![4]));
        live.insert("new.weight".into(), HostTensor::full(vec![2], 7.0));

        let mut loaded = StateDict::new();
        loaded.insert("head.weight".into(), seq(vec![3, 2], 1.0));
        loaded.insert("head.bias".into(), seq(vec![4], 1.0));
        loaded.insert("gone.weight".into(), seq(vec![1], 0.0));

        assert!(!is_exact_match(&loaded, &live));
        let merged = adapt_state_dict(&loaded, &live).unwrap();
        assert_eq!(merged.adapted, vec!["head.weight".to_string()]);
        assert_eq!(merged.missing, vec!["new.weight".to_string()]);
        assert_eq!(merged.unexpected, vec!["gone.weight".to_string()]);
        assert_eq!(merged.state["head.bias"].values(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(merged.state["new.weight"].values(), &[7.0, 7.0]);
        assert_eq!(merged.state["head.weight"].shape(), &[4, 2]);
        assert!(!merged.is_exact());
    }

    #[test]
    fn test_exact_match() {
        let mut live = StateDict::new();
        live.insert("w".into(), HostTensor::zeros(vec![2, 2]));
        let loaded = live.clone();
        assert!(is_exact_match(&loaded, &live));
        assert!(adapt_state_dict(&loaded, &live).unwrap().is_exact());
    }

    proptest! {
        #[test]
        fn prop_grown_rows_preserve_old_values(a in 1usize..6, b in 1usize..6, k in 1usize..4) {
            let old = seq(vec![a, b], 0.5);
            let template = seq(vec![a + k, b], 100.0);
            let out = adapt_weights(&old, &template).unwrap();
            prop_assert_eq!(&out.values()[..a * b], old.values());
            prop_assert_eq!(&out.values()[a * b..], &template.values()[a * b..]);
        }
    }
}
