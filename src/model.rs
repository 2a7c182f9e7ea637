//! The fixed catalog of chat models confab knows how to price.
//!
//! Only models in this catalog can be selected.  Each entry declares the
//! largest completion it may be asked for and its per-1000-token prices,
//! which the cost estimator uses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Known chat models.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KnownModel {
    /// GPT-4o mini: the cheap default.
    #[default]
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,

    /// GPT-4o.
    #[serde(rename = "gpt-4o")]
    Gpt4o,

    /// GPT-4 Turbo.
    #[serde(rename = "gpt-4-turbo")]
    Gpt4Turbo,

    /// GPT-3.5 Turbo.
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
}

/// Catalog entry for one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelInfo {
    /// The model this entry describes.
    pub model: KnownModel,
    /// Display name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Maximum output tokens the model accepts per request.
    pub max_tokens: u32,
    /// Price in dollars per 1000 input tokens.
    pub input_cost_per_1k: f64,
    /// Price in dollars per 1000 output tokens.
    pub output_cost_per_1k: f64,
}

const CATALOG: [ModelInfo; 4] = [
    ModelInfo {
        model: KnownModel::Gpt4oMini,
        name: "GPT-4o Mini",
        description: "Fast and inexpensive; good for everyday questions",
        max_tokens: 16384,
        input_cost_per_1k: 0.00015,
        output_cost_per_1k: 0.0006,
    },
    ModelInfo {
        model: KnownModel::Gpt4o,
        name: "GPT-4o",
        description: "Most capable general model; higher cost",
        max_tokens: 16384,
        input_cost_per_1k: 0.0025,
        output_cost_per_1k: 0.01,
    },
    ModelInfo {
        model: KnownModel::Gpt4Turbo,
        name: "GPT-4 Turbo",
        description: "Previous-generation flagship with a 4K completion limit",
        max_tokens: 4096,
        input_cost_per_1k: 0.01,
        output_cost_per_1k: 0.03,
    },
    ModelInfo {
        model: KnownModel::Gpt35Turbo,
        name: "GPT-3.5 Turbo",
        description: "Legacy low-cost model",
        max_tokens: 4096,
        input_cost_per_1k: 0.0005,
        output_cost_per_1k: 0.0015,
    },
];

impl KnownModel {
    /// Every model in the catalog, in display order.
    pub const ALL: [KnownModel; 4] = [
        KnownModel::Gpt4oMini,
        KnownModel::Gpt4o,
        KnownModel::Gpt4Turbo,
        KnownModel::Gpt35Turbo,
    ];

    /// Returns the wire identifier of the model.
    pub fn id(self) -> &'static str {
        match self {
            KnownModel::Gpt4oMini => "gpt-4o-mini",
            KnownModel::Gpt4o => "gpt-4o",
            KnownModel::Gpt4Turbo => "gpt-4-turbo",
            KnownModel::Gpt35Turbo => "gpt-3.5-turbo",
        }
    }

    /// Returns the catalog entry for the model.
    pub fn info(self) -> &'static ModelInfo {
        match self {
            KnownModel::Gpt4oMini => &CATALOG[0],
            KnownModel::Gpt4o => &CATALOG[1],
            KnownModel::Gpt4Turbo => &CATALOG[2],
            KnownModel::Gpt35Turbo => &CATALOG[3],
        }
    }
}

impl fmt::Display for KnownModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for KnownModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        KnownModel::ALL
            .into_iter()
            .find(|model| model.id() == s)
            .ok_or_else(|| Error::validation(format!("unknown model: {s}"), Some("model".into())))
    }
}

/// Returns the whole catalog in display order.
pub fn catalog() -> &'static [ModelInfo] {
    &CATALOG
}
