use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use tsify_next::Tsify;

// ============================================================================
// IDs - Using slotmap for generational indices
// ============================================================================

new_key_type! {
    pub struct NeighbourhoodId;
    pub struct HouseId;
    pub struct HouseholdId;
}

/// Trait for converting SlotMap keys to u64 for the WASM boundary and result tables
pub trait KeyToU64 {
    fn to_u64(self) -> u64;
}

impl KeyToU64 for NeighbourhoodId {
    fn to_u64(self) -> u64 {
        self.0.as_ffi()
    }
}

impl KeyToU64 for HouseId {
    fn to_u64(self) -> u64 {
        self.0.as_ffi()
    }
}

impl KeyToU64 for HouseholdId {
    fn to_u64(self) -> u64 {
        self.0.as_ffi()
    }
}

pub type Price = f64;
pub type Cash = f64;

// ============================================================================
// Neighbourhood attributes - What households care about
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum Attribute {
    HousingQuality,
    Shops,
    /// Inverted crime index
    Safety,
    Nature,
}

impl Attribute {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        match self {
            Attribute::HousingQuality => 0,
            Attribute::Shops => 1,
            Attribute::Safety => 2,
            Attribute::Nature => 3,
        }
    }

    /// Returns an iterator over all attributes, in vector order
    pub fn all() -> impl Iterator<Item = Attribute> {
        [
            Attribute::HousingQuality,
            Attribute::Shops,
            Attribute::Safety,
            Attribute::Nature,
        ]
        .into_iter()
    }
}

/// Normalized neighbourhood attributes, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AttributeVector(pub [f64; Attribute::COUNT]);

impl AttributeVector {
    pub fn get(&self, attribute: Attribute) -> f64 {
        self.0[attribute.index()]
    }

    pub fn set(&mut self, attribute: Attribute, value: f64) {
        self.0[attribute.index()] = value;
    }

    pub fn dot(&self, other: &AttributeVector) -> f64 {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }
}

/// Household preference weights over the attributes: non-negative, summing to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Preferences(pub AttributeVector);

impl Preferences {
    /// Normalize raw non-negative weights. All-zero input becomes uniform.
    pub fn from_raw(raw: [f64; Attribute::COUNT]) -> Self {
        let clean = raw.map(|w| if w.is_finite() { w.max(0.0) } else { 0.0 });
        let total: f64 = clean.iter().sum();
        if total <= 0.0 {
            return Self::uniform();
        }
        Self(AttributeVector(clean.map(|w| w / total)))
    }

    pub fn uniform() -> Self {
        Self(AttributeVector([1.0 / Attribute::COUNT as f64; Attribute::COUNT]))
    }

    pub fn weight(&self, attribute: Attribute) -> f64 {
        self.0.get(attribute)
    }

    /// Contentment a household with these preferences has in a neighbourhood.
    pub fn contentment(&self, attributes: &AttributeVector) -> f64 {
        self.0.dot(attributes)
    }
}

// ============================================================================
// Portrayal - Map colouring by trading activity
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub enum MapColor {
    Red,
    Orange,
    Blue,
    Grey,
}

impl MapColor {
    pub fn for_moves(moves: u32) -> Self {
        if moves > 60 {
            MapColor::Red
        } else if moves > 20 {
            MapColor::Orange
        } else if moves > 5 {
            MapColor::Blue
        } else {
            MapColor::Grey
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MapColor::Red => "Red",
            MapColor::Orange => "Orange",
            MapColor::Blue => "Blue",
            MapColor::Grey => "Grey",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_normalize() {
        let prefs = Preferences::from_raw([1.0, 1.0, 2.0, 0.0]);
        let total: f64 = Attribute::all().map(|a| prefs.weight(a)).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(prefs.weight(Attribute::Safety), 0.5);

        let zero = Preferences::from_raw([0.0; 4]);
        assert_eq!(zero, Preferences::uniform());

        let negative = Preferences::from_raw([-3.0, 1.0, f64::NAN, 1.0]);
        assert_eq!(negative.weight(Attribute::HousingQuality), 0.0);
        assert_eq!(negative.weight(Attribute::Shops), 0.5);
    }

    #[test]
    fn test_contentment_is_weighted_sum() {
        let prefs = Preferences::from_raw([1.0, 0.0, 0.0, 1.0]);
        let attrs = AttributeVector([0.8, 0.1, 0.1, 0.4]);
        assert!((prefs.contentment(&attrs) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_map_color_thresholds() {
        assert_eq!(MapColor::for_moves(0), MapColor::Grey);
        assert_eq!(MapColor::for_moves(5), MapColor::Grey);
        assert_eq!(MapColor::for_moves(6), MapColor::Blue);
        assert_eq!(MapColor::for_moves(21), MapColor::Orange);
        assert_eq!(MapColor::for_moves(61), MapColor::Red);
    }
}
