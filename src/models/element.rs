use serde::{Deserialize, Serialize};
use std::fmt;

/// Elemental affinity shown next to an enemy name
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Element {
    Fire,
    Water,
    Wind,
    Earth,
    Electricity,
}

impl Element {
    pub const ALL: [Element; 5] = [
        Element::Fire,
        Element::Water,
        Element::Wind,
        Element::Earth,
        Element::Electricity,
    ];

    /// Reference icon color (RGB) used when the hue is too washed out to classify
    pub fn reference_rgb(self) -> [f64; 3] {
        match self {
            Element::Fire => [121.0, 94.0, 85.0],
            Element::Water => [130.0, 141.0, 149.0],
            Element::Wind => [83.0, 105.0, 68.0],
            Element::Earth => [96.0, 74.0, 79.0],
            Element::Electricity => [125.0, 114.0, 72.0],
        }
    }

    /// Classify a saturated hue in degrees
    pub fn from_hue(hue: f64) -> Element {
        if hue < 30.0 || hue >= 330.0 {
            Element::Fire
        } else if hue < 70.0 {
            Element::Electricity
        } else if hue < 170.0 {
            Element::Wind
        } else if hue < 250.0 {
            Element::Water
        } else {
            Element::Earth
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Element::Fire => "fire",
            Element::Water => "water",
            Element::Wind => "wind",
            Element::Earth => "earth",
            Element::Electricity => "electricity",
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hue() {
        assert_eq!(Element::from_hue(0.0), Element::Fire);
        assert_eq!(Element::from_hue(345.0), Element::Fire);
        assert_eq!(Element::from_hue(50.0), Element::Electricity);
        assert_eq!(Element::from_hue(120.0), Element::Wind);
        assert_eq!(Element::from_hue(210.0), Element::Water);
        assert_eq!(Element::from_hue(290.0), Element::Earth);
    }

    #[test]
    fn test_element_serialization() {
        assert_eq!(
            serde_json::to_string(&Element::Electricity).unwrap(),
            "\"electricity\""
        );
        assert_eq!(Element::Water.to_string(), "water");
    }
}
