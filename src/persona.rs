//! Registry of personas: named system prompts stored as text files.
//!
//! A persona directory holds `manifest.yaml` and one text file per persona:
//!
//! ```yaml
//! current: default
//! personas:
//!   default:
//!     name: Default Assistant
//!     description: General-purpose helpful assistant
//!     file: default.txt
//!     category: general
//! ```
//!
//! The registry always resolves to some usable prompt.  A missing or corrupt
//! manifest is replaced with the default one, an unknown persona resolves to
//! `default`, and if even the default prompt file is gone a built-in prompt is
//! used.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::observability::CONFIG_FALLBACKS;
use crate::utils::fs::write_atomic;

/// Filename of the manifest inside the persona directory.
pub const MANIFEST_FILE: &str = "manifest.yaml";

/// Identifier of the persona every lookup falls back to.
pub const DEFAULT_PERSONA: &str = "default";

/// Prompt used when no prompt file can be read.
pub const FALLBACK_PROMPT: &str = "You are a helpful assistant. Answer clearly and concisely.";

const DEFAULT_CATEGORY: &str = "general";

/// Metadata for one persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Display name.
    pub name: String,
    /// One-line description.
    #[serde(default)]
    pub description: String,
    /// Prompt file, relative to the persona directory.
    pub file: String,
    /// Category used to group personas in listings.
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    current: String,
    #[serde(default)]
    personas: BTreeMap<String, Persona>,
}

impl Default for Manifest {
    fn default() -> Self {
        let mut personas = BTreeMap::new();
        personas.insert(
            DEFAULT_PERSONA.to_string(),
            Persona {
                name: "Default Assistant".to_string(),
                description: "General-purpose helpful assistant".to_string(),
                file: format!("{DEFAULT_PERSONA}.txt"),
                category: default_category(),
            },
        );
        Manifest {
            current: DEFAULT_PERSONA.to_string(),
            personas,
        }
    }
}

/// Personas loaded from a persona directory.
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    dir: PathBuf,
    manifest: Manifest,
}

impl PersonaRegistry {
    /// Loads the registry rooted at `dir`, repairing it when needed.
    ///
    /// Never fails: problems are logged and the built-in default is used.
    pub fn load(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest = match read_manifest(&manifest_path) {
            Ok(manifest) => manifest,
            Err(err) => {
                CONFIG_FALLBACKS.click();
                tracing::warn!(error = %err, "persona manifest unusable; writing the default");
                let manifest = Manifest::default();
                if let Err(err) = write_default_files(&dir, &manifest) {
                    tracing::warn!(error = %err, "could not write the default persona manifest");
                }
                manifest
            }
        };
        let mut registry = PersonaRegistry { dir, manifest };
        if !registry.manifest.personas.contains_key(&registry.manifest.current) {
            CONFIG_FALLBACKS.click();
            tracing::warn!(
                current = %registry.manifest.current,
                "current persona is not in the manifest; using {DEFAULT_PERSONA}"
            );
            registry.manifest.current = DEFAULT_PERSONA.to_string();
        }
        registry
    }

    /// Directory the registry reads prompt files from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Identifier of the active persona.
    pub fn current_id(&self) -> &str {
        &self.manifest.current
    }

    /// Metadata of the active persona, if the manifest lists it.
    pub fn current(&self) -> Option<&Persona> {
        self.get(self.current_id())
    }

    /// Metadata of the persona `id`.
    pub fn get(&self, id: &str) -> Option<&Persona> {
        self.manifest.personas.get(id)
    }

    /// Returns true if `id` is a known persona.
    pub fn contains(&self, id: &str) -> bool {
        self.manifest.personas.contains_key(id)
    }

    /// All personas, grouped by category and then sorted by id.
    pub fn list(&self) -> Vec<(&str, &Persona)> {
        let mut personas: Vec<(&str, &Persona)> = self
            .manifest
            .personas
            .iter()
            .map(|(id, persona)| (id.as_str(), persona))
            .collect();
        personas.sort_by(|a, b| a.1.category.cmp(&b.1.category).then(a.0.cmp(b.0)));
        personas
    }

    /// Returns the system prompt for `id`, or for the active persona.
    ///
    /// Always returns usable text.
    pub fn resolve_content(&self, id: Option<&str>) -> String {
        let id = id.unwrap_or(self.current_id());
        let persona = match self.get(id) {
            Some(persona) => Some(persona),
            None => {
                tracing::warn!(persona = id, "unknown persona; using {DEFAULT_PERSONA}");
                self.get(DEFAULT_PERSONA)
            }
        };
        if let Some(persona) = persona {
            match self.read_prompt(persona) {
                Ok(content) => return content,
                Err(err) => {
                    tracing::warn!(persona = id, error = %err, "could not read persona prompt");
                }
            }
        }
        if let Some(default) = self.get(DEFAULT_PERSONA) {
            match self.read_prompt(default) {
                Ok(content) => return content,
                Err(err) => {
                    tracing::warn!(error = %err, "could not read the default persona prompt");
                }
            }
        }
        CONFIG_FALLBACKS.click();
        FALLBACK_PROMPT.to_string()
    }

    /// Makes `id` the active persona and persists the manifest.
    ///
    /// Unknown ids are rejected and leave the registry unchanged.
    pub fn set_current(&mut self, id: &str) -> Result<()> {
        if !self.contains(id) {
            return Err(Error::validation(
                format!("unknown persona: {id}"),
                Some("persona".to_string()),
            ));
        }
        let previous = std::mem::replace(&mut self.manifest.current, id.to_string());
        if let Err(err) = self.save() {
            self.manifest.current = previous;
            return Err(err);
        }
        tracing::debug!(persona = id, "switched persona");
        Ok(())
    }

    /// Registers a new persona whose prompt is `content`.
    ///
    /// The prompt is written to `<id>.txt` before the manifest is updated, so
    /// a failed write leaves the registry untouched.
    pub fn create_custom(
        &mut self,
        id: &str,
        name: &str,
        description: &str,
        content: &str,
        category: &str,
    ) -> Result<()> {
        validate_id(id)?;
        if self.contains(id) {
            return Err(Error::validation(
                format!("persona already exists: {id}"),
                Some("id".to_string()),
            ));
        }
        let file = format!("{id}.txt");
        write_atomic(&self.dir.join(&file), content.as_bytes())?;
        let category = if category.trim().is_empty() {
            default_category()
        } else {
            category.trim().to_string()
        };
        self.manifest.personas.insert(
            id.to_string(),
            Persona {
                name: name.to_string(),
                description: description.to_string(),
                file,
                category,
            },
        );
        if let Err(err) = self.save() {
            self.manifest.personas.remove(id);
            return Err(err);
        }
        tracing::info!(persona = id, "created persona");
        Ok(())
    }

    fn read_prompt(&self, persona: &Persona) -> Result<String> {
        let path = self.dir.join(&persona.file);
        fs::read_to_string(&path)
            .map_err(|err| Error::io(format!("failed to read {}", path.display()), err))
    }

    fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.manifest)?;
        write_atomic(&self.dir.join(MANIFEST_FILE), yaml.as_bytes())
    }
}

fn read_manifest(path: &Path) -> Result<Manifest> {
    let text = fs::read_to_string(path).map_err(|err| {
        Error::configuration(
            format!("cannot read manifest: {err}"),
            Some(path.display().to_string()),
        )
    })?;
    serde_yaml::from_str(&text).map_err(|err| {
        Error::configuration(
            format!("cannot parse manifest: {err}"),
            Some(path.display().to_string()),
        )
    })
}

fn write_default_files(dir: &Path, manifest: &Manifest) -> Result<()> {
    let yaml = serde_yaml::to_string(manifest)?;
    write_atomic(&dir.join(MANIFEST_FILE), yaml.as_bytes())?;
    let prompt = dir.join(format!("{DEFAULT_PERSONA}.txt"));
    if !prompt.exists() {
        write_atomic(&prompt, FALLBACK_PROMPT.as_bytes())?;
    }
    Ok(())
}

fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::validation(
            format!("persona ids may only contain letters, digits, '-' and '_': {id:?}"),
            Some("id".to_string()),
        ))
    }
}
