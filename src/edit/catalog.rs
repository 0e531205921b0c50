use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::normalize_category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryFamily {
    Makeup,
    Jewelry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Shade {
    pub name: &'static str,
    pub hex: &'static str,
}

const fn shade(name: &'static str, hex: &'static str) -> Shade {
    Shade { name, hex }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategorySpec {
    pub key: &'static str,
    pub label: &'static str,
    pub api_name: &'static str,
    pub default_intensity: Option<u8>,
    pub shades: &'static [Shade],
}

static MAKEUP_CATEGORIES: [CategorySpec; 6] = [
    CategorySpec {
        key: "foundation",
        label: "Foundation",
        api_name: "foundation",
        default_intensity: Some(100),
        shades: &[
            shade("Light", "#F3E5D8"),
            shade("Medium", "#D9B99B"),
            shade("Dark", "#7E553A"),
        ],
    },
    CategorySpec {
        key: "blush",
        label: "Blush",
        api_name: "blush",
        default_intensity: Some(60),
        shades: &[
            shade("Light", "#F7A5B2"),
            shade("Medium", "#EB7C93"),
            shade("Dark", "#D9536A"),
        ],
    },
    CategorySpec {
        key: "eyeshadow",
        label: "Eyeshadow",
        api_name: "eyeshadow",
        default_intensity: Some(60),
        shades: &[
            shade("Light", "#D8C4B6"),
            shade("Medium", "#8E6E5E"),
            shade("Dark", "#6A1B9A"),
        ],
    },
    CategorySpec {
        key: "kohl",
        label: "Kohl",
        api_name: "kohl",
        default_intensity: Some(95),
        shades: &[
            shade("Light", "#3E2723"),
            shade("Medium", "#142850"),
            shade("Dark", "#000000"),
        ],
    },
    CategorySpec {
        key: "mascara",
        label: "Mascara",
        api_name: "mascara",
        default_intensity: Some(85),
        shades: &[
            shade("Light", "#3E2723"),
            shade("Medium", "#1A1A1A"),
            shade("Dark", "#000000"),
        ],
    },
    CategorySpec {
        key: "lipstick",
        label: "Lipstick",
        api_name: "lips",
        default_intensity: Some(85),
        shades: &[
            shade("Light", "#B56576"),
            shade("Medium", "#CF2F3A"),
            shade("Dark", "#9B111E"),
        ],
    },
];

static JEWELRY_CATEGORIES: [CategorySpec; 5] = [
    CategorySpec {
        key: "nosepin",
        label: "Nose Pin",
        api_name: "nosepin",
        default_intensity: None,
        shades: &[],
    },
    CategorySpec {
        key: "earrings",
        label: "Earrings",
        api_name: "earrings",
        default_intensity: None,
        shades: &[],
    },
    CategorySpec {
        key: "necklace",
        label: "Necklace",
        api_name: "necklace",
        default_intensity: None,
        shades: &[],
    },
    CategorySpec {
        key: "bindi",
        label: "Bindi",
        api_name: "bindi",
        default_intensity: None,
        shades: &[],
    },
    CategorySpec {
        key: "tikka",
        label: "Maang Tikka",
        api_name: "tikka",
        default_intensity: None,
        shades: &[],
    },
];

impl CategoryFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Makeup => "makeup",
            Self::Jewelry => "jewelry",
        }
    }

    /// Categories in canonical layering order.
    pub fn categories(self) -> &'static [CategorySpec] {
        match self {
            Self::Makeup => &MAKEUP_CATEGORIES,
            Self::Jewelry => &JEWELRY_CATEGORIES,
        }
    }

    pub fn lookup(self, category: &str) -> Option<&'static CategorySpec> {
        let key = normalize_category(category);
        self.categories().iter().find(|spec| spec.key == key)
    }

    pub fn default_endpoint_path(self) -> &'static str {
        match self {
            Self::Makeup => "/manual-makeup/",
            Self::Jewelry => "/tryon-jewelry/",
        }
    }

    pub fn category_field(self) -> &'static str {
        match self {
            Self::Makeup => "category",
            Self::Jewelry => "item",
        }
    }

    pub fn api_name(self, category: &str) -> String {
        self.lookup(category)
            .map(|spec| spec.api_name.to_string())
            .unwrap_or_else(|| normalize_category(category))
    }

    pub fn label(self, category: &str) -> String {
        self.lookup(category)
            .map(|spec| spec.label.to_string())
            .unwrap_or_else(|| category.trim().to_string())
    }
}

impl CategorySpec {
    pub fn shade(&self, name_or_hex: &str) -> Option<&'static Shade> {
        let wanted = name_or_hex.trim();
        self.shades
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(wanted) || s.hex.eq_ignore_ascii_case(wanted))
    }
}

impl fmt::Display for CategoryFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryFamily {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "makeup" => Ok(Self::Makeup),
            "jewelry" | "jewellery" => Ok(Self::Jewelry),
            other => Err(CatalogError::UnknownFamily(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown category family '{0}'; expected makeup or jewelry")]
    UnknownFamily(String),
}
