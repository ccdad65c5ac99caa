use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::config::{Direction, FeatureOverride, FeatureType, NumberingMode};
use crate::error::PideeError;

pub const BUTTON: &str = "button";
pub const LED_RED: &str = "led-red";
pub const LED_GREEN: &str = "led-green";
pub const LED_BLUE: &str = "led-blue";
pub const DIP_COUNT: usize = 8;

// name, type, physical, bcm, logical
const DEFAULT_FEATURES: [(&str, FeatureType, u32, u32, u32); 12] = [
    (BUTTON, FeatureType::Button, 12, 18, 1),
    ("dip-1", FeatureType::Dip, 11, 17, 0),
    ("dip-2", FeatureType::Dip, 13, 27, 2),
    ("dip-3", FeatureType::Dip, 15, 22, 3),
    ("dip-4", FeatureType::Dip, 16, 23, 4),
    ("dip-5", FeatureType::Dip, 18, 24, 5),
    ("dip-6", FeatureType::Dip, 22, 25, 6),
    ("dip-7", FeatureType::Dip, 29, 5, 21),
    ("dip-8", FeatureType::Dip, 31, 6, 22),
    (LED_RED, FeatureType::Led, 33, 13, 23),
    (LED_GREEN, FeatureType::Led, 32, 12, 26),
    (LED_BLUE, FeatureType::Led, 35, 19, 24),
];

/// Name of the dip switch at a zero-based index.
pub fn dip_name(index: usize) -> String {
    format!("dip-{}", index + 1)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureDescriptor {
    name: String,
    #[serde(rename = "type")]
    feature_type: FeatureType,
    direction: Direction,
    physical: u32,
    bcm: u32,
    logical: u32,
}

impl FeatureDescriptor {
    pub fn new(
        name: impl Into<String>,
        feature_type: FeatureType,
        physical: u32,
        bcm: u32,
        logical: u32,
    ) -> Self {
        Self {
            name: name.into(),
            feature_type,
            direction: feature_type.direction(),
            physical,
            bcm,
            logical,
        }
    }

    fn from_override(name: &str, o: &FeatureOverride) -> Self {
        Self::new(name, o.feature_type, o.physical, o.bcm, o.logical)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn feature_type(&self) -> FeatureType {
        self.feature_type
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn bcm(&self) -> u32 {
        self.bcm
    }

    pub fn pin(&self, mode: NumberingMode) -> u32 {
        match mode {
            NumberingMode::Physical => self.physical,
            NumberingMode::Bcm => self.bcm,
            NumberingMode::Logical => self.logical,
        }
    }
}

/// Read-only mapping from feature name to descriptor, in registration order.
#[derive(Debug, Clone)]
pub struct PinRegistry {
    features: Vec<FeatureDescriptor>,
    index: FxHashMap<String, usize>,
}

impl Default for PinRegistry {
    fn default() -> Self {
        Self::with_overrides(&FxHashMap::default())
    }
}

impl PinRegistry {
    /// Builds the default table, then applies `overrides`. An override that
    /// names an existing feature replaces it in place; new names are appended
    /// in name order so the resulting layout does not depend on map iteration.
    pub fn with_overrides(overrides: &FxHashMap<String, FeatureOverride>) -> Self {
        let mut registry = Self {
            features: Vec::with_capacity(DEFAULT_FEATURES.len() + overrides.len()),
            index: FxHashMap::default(),
        };

        for (name, feature_type, physical, bcm, logical) in DEFAULT_FEATURES {
            registry.insert(FeatureDescriptor::new(
                name,
                feature_type,
                physical,
                bcm,
                logical,
            ));
        }

        let mut names: Vec<&String> = overrides.keys().collect();
        names.sort();
        for name in names {
            registry.insert(FeatureDescriptor::from_override(name, &overrides[name]));
        }

        registry
    }

    fn insert(&mut self, descriptor: FeatureDescriptor) {
        match self.index.get(descriptor.name()) {
            Some(&i) => self.features[i] = descriptor,
            None => {
                self.index
                    .insert(descriptor.name().to_string(), self.features.len());
                self.features.push(descriptor);
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<&FeatureDescriptor, PideeError> {
        self.index
            .get(name)
            .map(|&i| &self.features[i])
            .ok_or_else(|| PideeError::UnknownFeature(name.to_string()))
    }

    pub fn resolve(&self, name: &str, mode: NumberingMode) -> Result<u32, PideeError> {
        Ok(self.get(name)?.pin(mode))
    }

    pub fn direction(&self, name: &str) -> Result<Direction, PideeError> {
        Ok(self.get(name)?.direction())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureDescriptor> {
        self.features.iter()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
