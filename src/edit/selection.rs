use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::catalog::{CategoryFamily, CategorySpec};
use super::EditOperation;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pick {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    family: CategoryFamily,
    picks: BTreeMap<&'static str, Pick>,
    intensity: BTreeMap<&'static str, u8>,
}

impl Selection {
    pub fn new(family: CategoryFamily) -> Self {
        let intensity = family
            .categories()
            .iter()
            .filter_map(|spec| spec.default_intensity.map(|v| (spec.key, v)))
            .collect();
        Self {
            family,
            picks: BTreeMap::new(),
            intensity,
        }
    }

    pub fn family(&self) -> CategoryFamily {
        self.family
    }

    pub fn is_empty(&self) -> bool {
        self.picks.is_empty()
    }

    pub fn pick(&self, category: &str) -> Option<&Pick> {
        let spec = self.family.lookup(category)?;
        self.picks.get(spec.key)
    }

    pub fn pick_shade(&mut self, category: &str, shade: &str) -> Result<(), SelectionError> {
        let spec = self.spec(category)?;
        let found = spec
            .shade(shade)
            .ok_or_else(|| SelectionError::UnknownShade {
                category: spec.key.to_string(),
                shade: shade.trim().to_string(),
            })?;
        self.picks.insert(
            spec.key,
            Pick {
                color: Some(found.hex.to_string()),
                shade: Some(found.name.to_string()),
                overlay_url: None,
            },
        );
        Ok(())
    }

    pub fn pick_color(&mut self, category: &str, hex: &str) -> Result<(), SelectionError> {
        let spec = self.spec(category)?;
        let hex = hex.trim();
        if !is_hex_color(hex) {
            return Err(SelectionError::InvalidColor(hex.to_string()));
        }
        let shade = spec.shade(hex).map(|s| s.name.to_string());
        self.picks.insert(
            spec.key,
            Pick {
                color: Some(hex.to_ascii_uppercase()),
                shade,
                overlay_url: None,
            },
        );
        Ok(())
    }

    pub fn pick_overlay(
        &mut self,
        category: &str,
        overlay_url: Option<&str>,
    ) -> Result<(), SelectionError> {
        let spec = self.spec(category)?;
        let overlay_url = overlay_url
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        self.picks.insert(
            spec.key,
            Pick {
                color: None,
                shade: None,
                overlay_url,
            },
        );
        Ok(())
    }

    pub fn clear(&mut self, category: &str) {
        if let Some(spec) = self.family.lookup(category) {
            self.picks.remove(spec.key);
        }
    }

    pub fn set_intensity(&mut self, category: &str, percent: u8) -> Result<(), SelectionError> {
        let spec = self.spec(category)?;
        if spec.default_intensity.is_none() {
            return Err(SelectionError::IntensityNotSupported(spec.key.to_string()));
        }
        self.intensity.insert(spec.key, percent.min(100));
        Ok(())
    }

    pub fn intensity(&self, category: &str) -> Option<u8> {
        let spec = self.family.lookup(category)?;
        self.intensity.get(spec.key).copied()
    }

    pub fn operation_for(&self, category: &str) -> Option<EditOperation> {
        let spec = self.family.lookup(category)?;
        let pick = self.picks.get(spec.key)?;
        let mut op = EditOperation::new(spec.key);
        if let Some(color) = pick.color.as_deref() {
            op = op.with_param("color", color);
        }
        if let Some(shade) = pick.shade.as_deref() {
            op = op.with_param("shade", shade);
        }
        if let Some(url) = pick.overlay_url.as_deref() {
            op = op.with_param("overlay_url", url);
        }
        if let Some(percent) = self.intensity.get(spec.key) {
            op = op.with_param("intensity", intensity_fraction(*percent));
        }
        Some(op)
    }

    /// Picked categories as operations, already in the family's layering order.
    pub fn operations(&self) -> Vec<EditOperation> {
        self.family
            .categories()
            .iter()
            .filter_map(|spec| self.operation_for(spec.key))
            .collect()
    }

    fn spec(&self, category: &str) -> Result<&'static CategorySpec, SelectionError> {
        self.family
            .lookup(category)
            .ok_or_else(|| SelectionError::UnknownCategory {
                family: self.family,
                category: category.trim().to_string(),
            })
    }
}

fn intensity_fraction(percent: u8) -> String {
    (f64::from(percent) / 100.0).to_string()
}

fn is_hex_color(value: &str) -> bool {
    let Some(digits) = value.strip_prefix('#') else {
        return false;
    };
    digits.len() == 6 && digits.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("unknown {family} category '{category}'")]
    UnknownCategory {
        family: CategoryFamily,
        category: String,
    },
    #[error("unknown shade '{shade}' for {category}")]
    UnknownShade { category: String, shade: String },
    #[error("invalid color '{0}'; expected #RRGGBB")]
    InvalidColor(String),
    #[error("{0} has no intensity setting")]
    IntensityNotSupported(String),
}
