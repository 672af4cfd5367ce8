//! Formula family identifiers and feature schemas.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named feature-extraction strategy.
///
/// Declaration order is the family index used for stable tie-breaking.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum FamilyId {
    Phonetic,
    Semantic,
    Structural,
    Frequency,
    Numerological,
    Hybrid,
}

impl FamilyId {
    /// Every family, in index order.
    pub const ALL: [FamilyId; 6] = [
        FamilyId::Phonetic,
        FamilyId::Semantic,
        FamilyId::Structural,
        FamilyId::Frequency,
        FamilyId::Numerological,
        FamilyId::Hybrid,
    ];

    /// Stable index of this family.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            FamilyId::Phonetic => "phonetic",
            FamilyId::Semantic => "semantic",
            FamilyId::Structural => "structural",
            FamilyId::Frequency => "frequency",
            FamilyId::Numerological => "numerological",
            FamilyId::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One named component of a feature schema with its valid range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentSpec {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
}

impl ComponentSpec {
    pub const fn new(name: &'static str, min: f64, max: f64) -> Self {
        Self { name, min, max }
    }

    /// Width of the valid range.
    #[inline]
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Clamp a raw value into range, mapping non-finite values to the minimum.
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_finite() {
            value.clamp(self.min, self.max)
        } else {
            self.min
        }
    }

    /// Map an in-range value to [0, 1].
    #[inline]
    pub fn normalize(&self, value: f64) -> f64 {
        if self.span() <= 0.0 {
            0.0
        } else {
            (self.clamp(value) - self.min) / self.span()
        }
    }
}

/// Fixed, ordered component list of one family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureSchema {
    pub family: FamilyId,
    pub components: &'static [ComponentSpec],
}

impl FeatureSchema {
    #[inline]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn component_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.components.iter().map(|c| c.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_order() {
        for (i, family) in FamilyId::ALL.iter().enumerate() {
            assert_eq!(family.index(), i);
        }
        assert!(FamilyId::Phonetic < FamilyId::Hybrid);
    }

    #[test]
    fn test_family_serde_name() {
        let json = serde_json::to_string(&FamilyId::Numerological).unwrap();
        assert_eq!(json, "\"numerological\"");
        let parsed: FamilyId = serde_json::from_str("\"hybrid\"").unwrap();
        assert_eq!(parsed, FamilyId::Hybrid);
    }

    #[test]
    fn test_component_normalize() {
        let spec = ComponentSpec::new("x", 0.0, 4.0);
        assert_eq!(spec.normalize(2.0), 0.5);
        assert_eq!(spec.normalize(10.0), 1.0);
        assert_eq!(spec.normalize(f64::NAN), 0.0);
    }
}
