//! Loss-term keys and coefficient tables.
//!
//! The criterion names its terms with strings such as `bbox`, `giou_2`,
//! `cls_1_dn`, `bbox_enc` or `segce_one2many`. Each string parses into a
//! [`LossKey`]: a [`LossCategory`] plus the branch tags that follow it.
//! Weighting depends on the category alone, so the number of decoder layers
//! or optional branches in a run never touches the aggregation rules.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CoreError, Result};

/// Kind of loss term.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LossCategory {
    /// L1 box regression.
    Bbox,
    /// Generalized IoU.
    Giou,
    /// Classification.
    Cls,
    /// Segmentation cross-entropy.
    SegCe,
    /// Segmentation dice.
    SegDice,
    /// Summed loss of the frozen auxiliary model.
    AuxModel,
    /// Summed loss of the frozen previous-stage model.
    OldModel,
    /// Hausdorff distance; a diagnostic, never optimized.
    Hausdorff,
    /// Any other criterion term, by name.
    Other(String),
}

impl LossCategory {
    /// Canonical name as it appears in keys.
    pub fn name(&self) -> &str {
        match self {
            LossCategory::Bbox => "bbox",
            LossCategory::Giou => "giou",
            LossCategory::Cls => "cls",
            LossCategory::SegCe => "segce",
            LossCategory::SegDice => "segdice",
            LossCategory::AuxModel => "aux_model",
            LossCategory::OldModel => "old_model",
            LossCategory::Hausdorff => "hd95",
            LossCategory::Other(name) => name,
        }
    }

    /// Name used to look up the coefficient: the first underscore-delimited
    /// segment of the canonical name.
    pub fn coefficient_name(&self) -> &str {
        let name = self.name();
        name.split('_').next().unwrap_or(name)
    }
}

/// Branch a loss term was computed on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BranchTag {
    /// Auxiliary decoder layer `n`.
    Layer(usize),
    /// Denoising queries.
    Denoising,
    /// Two-stage encoder proposals.
    Encoder,
    /// One-to-many hybrid matching branch.
    OneToMany,
    /// Unrecognized suffix, kept verbatim.
    Other(String),
}

impl BranchTag {
    fn parse(segment: &str) -> Self {
        match segment {
            "dn" => BranchTag::Denoising,
            "enc" => BranchTag::Encoder,
            "one2many" => BranchTag::OneToMany,
            s => s
                .parse()
                .map(BranchTag::Layer)
                .unwrap_or_else(|_| BranchTag::Other(s.to_string())),
        }
    }
}

impl fmt::Display for BranchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchTag::Layer(n) => write!(f, "{}", n),
            BranchTag::Denoising => f.write_str("dn"),
            BranchTag::Encoder => f.write_str("enc"),
            BranchTag::OneToMany => f.write_str("one2many"),
            BranchTag::Other(s) => f.write_str(s),
        }
    }
}

/// Logging bucket of a loss term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogGroup {
    /// Final decoder output, frozen models, hybrid branch.
    Main,
    /// Auxiliary decoder layers.
    AuxLayers,
    /// Encoder proposals.
    Encoder,
    /// Denoising branch.
    Denoising,
}

/// Parsed loss-term name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LossKey {
    category: LossCategory,
    branches: Vec<BranchTag>,
}

impl LossKey {
    /// Key for a bare category.
    pub fn new(category: LossCategory) -> Self {
        Self {
            category,
            branches: Vec::new(),
        }
    }

    /// Parse a criterion key such as `giou_3_dn`.
    pub fn parse(key: &str) -> Self {
        for (prefix, category) in [
            ("aux_model", LossCategory::AuxModel),
            ("old_model", LossCategory::OldModel),
        ] {
            if let Some(rest) = key.strip_prefix(prefix) {
                if rest.is_empty() || rest.starts_with('_') {
                    return Self {
                        category,
                        branches: parse_branches(rest),
                    };
                }
            }
        }

        let (head, rest) = match key.find('_') {
            Some(i) => key.split_at(i),
            None => (key, ""),
        };
        let category = match head {
            "bbox" => LossCategory::Bbox,
            "giou" => LossCategory::Giou,
            "cls" => LossCategory::Cls,
            "segce" => LossCategory::SegCe,
            "segdice" => LossCategory::SegDice,
            "hd95" => LossCategory::Hausdorff,
            other => LossCategory::Other(other.to_string()),
        };
        Self {
            category,
            branches: parse_branches(rest),
        }
    }

    /// Same key with `tag` appended.
    pub fn with_branch(mut self, tag: BranchTag) -> Self {
        self.branches.push(tag);
        self
    }

    /// Category.
    pub fn category(&self) -> &LossCategory {
        &self.category
    }

    /// Branch tags in order.
    pub fn branches(&self) -> &[BranchTag] {
        &self.branches
    }

    /// True for the Hausdorff diagnostic.
    pub fn is_diagnostic(&self) -> bool {
        self.category == LossCategory::Hausdorff
    }

    /// Where the term's running mean is logged.
    pub fn log_group(&self) -> LogGroup {
        if self.branches.contains(&BranchTag::OneToMany) {
            LogGroup::Main
        } else if self.branches.contains(&BranchTag::Denoising) {
            LogGroup::Denoising
        } else if self.branches.contains(&BranchTag::Encoder) {
            LogGroup::Encoder
        } else if self
            .branches
            .iter()
            .any(|b| matches!(b, BranchTag::Layer(_)))
        {
            LogGroup::AuxLayers
        } else {
            LogGroup::Main
        }
    }
}

fn parse_branches(rest: &str) -> Vec<BranchTag> {
    rest.split('_')
        .filter(|s| !s.is_empty())
        .map(BranchTag::parse)
        .collect()
}

impl fmt::Display for LossKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category.name())?;
        for tag in &self.branches {
            write!(f, "_{}", tag)?;
        }
        Ok(())
    }
}

impl From<&str> for LossKey {
    fn from(key: &str) -> Self {
        Self::parse(key)
    }
}

/// Per-category loss weights.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LossCoefficients {
    table: BTreeMap<String, f64>,
}

impl LossCoefficients {
    /// Build from `(coefficient name, weight)` pairs.
    pub fn new(table: BTreeMap<String, f64>) -> Self {
        Self { table }
    }

    /// Register or replace a weight.
    pub fn with(mut self, name: impl Into<String>, weight: f64) -> Self {
        self.table.insert(name.into(), weight);
        self
    }

    /// Weight for `key`, or a configuration error if none is registered.
    pub fn coefficient(&self, key: &LossKey) -> Result<f64> {
        let name = key.category().coefficient_name();
        self.table
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::MissingCoefficient {
                key: key.to_string(),
                category: name.to_string(),
            })
    }

    /// Registered entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.table.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_keys() {
        let k = LossKey::parse("bbox_3_dn");
        assert_eq!(k.category(), &LossCategory::Bbox);
        assert_eq!(k.branches(), &[BranchTag::Layer(3), BranchTag::Denoising]);
        assert_eq!(k.to_string(), "bbox_3_dn");

        let k = LossKey::parse("aux_model");
        assert_eq!(k.category(), &LossCategory::AuxModel);
        assert!(k.branches().is_empty());
        assert_eq!(k.category().coefficient_name(), "aux");

        let k = LossKey::parse("segdice_one2many");
        assert_eq!(k.branches(), &[BranchTag::OneToMany]);
        assert!(LossKey::parse("hd95").is_diagnostic());

        let k = LossKey::parse("contrast_q");
        assert_eq!(k.category(), &LossCategory::Other("contrast".into()));
        assert_eq!(k.to_string(), "contrast_q");
    }

    #[test]
    fn test_log_groups() {
        assert_eq!(LossKey::parse("cls").log_group(), LogGroup::Main);
        assert_eq!(LossKey::parse("cls_2").log_group(), LogGroup::AuxLayers);
        assert_eq!(LossKey::parse("cls_2_dn").log_group(), LogGroup::Denoising);
        assert_eq!(LossKey::parse("giou_enc").log_group(), LogGroup::Encoder);
        assert_eq!(LossKey::parse("bbox_0_one2many").log_group(), LogGroup::Main);
    }

    #[test]
    fn test_coefficient_lookup_uses_first_segment() {
        let coefs = LossCoefficients::default()
            .with("bbox", 5.0)
            .with("old", 0.5);
        assert_eq!(coefs.coefficient(&"bbox_dn".into()).unwrap(), 5.0);
        assert_eq!(coefs.coefficient(&"old_model".into()).unwrap(), 0.5);
        assert_eq!(
            coefs.coefficient(&"giou".into()),
            Err(CoreError::MissingCoefficient {
                key: "giou".into(),
                category: "giou".into()
            })
        );
    }

    #[test]
    fn test_branch_keys_share_unregistered_failure() {
        let coefs = LossCoefficients::default().with("bbox", 1.0);
        assert!(coefs.coefficient(&LossKey::parse("bbox_2_dn")).is_ok());
        assert!(coefs.coefficient(&LossKey::parse("cls_one2many")).is_err());
    }

    fn key_strategy() -> impl Strategy<Value = String> {
        let head = prop::sample::select(vec!["bbox", "giou", "cls", "segce", "segdice", "aux_model"]);
        let tail = prop::sample::select(vec!["", "_0", "_3", "_dn", "_1_dn", "_enc", "_one2many"]);
        (head, tail).prop_map(|(h, t)| format!("{}{}", h, t))
    }

    proptest! {
        #[test]
        fn prop_coefficient_follows_first_segment(
            weights in prop::collection::vec(0.0f64..10.0, 6),
            keys in prop::collection::vec(key_strategy(), 0..20),
        ) {
            let names = ["bbox", "giou", "cls", "segce", "segdice", "aux"];
            let coefs = names
                .iter()
                .zip(&weights)
                .fold(LossCoefficients::default(), |c, (n, w)| c.with(*n, *w));

            for key in &keys {
                let prefix = key.split('_').next().unwrap();
                let idx = names.iter().position(|n| *n == prefix).unwrap();
                let got = coefs.coefficient(&LossKey::parse(key)).unwrap();
                prop_assert_eq!(got.to_bits(), weights[idx].to_bits());
            }
        }
    }
}
