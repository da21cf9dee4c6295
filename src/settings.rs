//! Persisted per-component UI state.
//!
//! Each overlay window registers a component id; its open flag, geometry and
//! widget values are saved to and loaded from named JSON files in a config
//! directory, shaped as `{"components": {"<id>": {...}}}`.

use crate::storage::is_plain_name;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Saved state of one overlay component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentState {
    pub id: String,
    pub is_open: bool,
    pub position: [f32; 2],
    pub size: [f32; 2],
    pub slider_float: f32,
    pub slider_int: i32,
    pub checkbox: bool,
    pub color: [f32; 4],
}

impl Default for ComponentState {
    fn default() -> Self {
        Self {
            id: String::new(),
            is_open: true,
            position: [0.0, 0.0],
            size: [0.0, 0.0],
            slider_float: 0.0,
            slider_int: 0,
            checkbox: false,
            color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    components: BTreeMap<String, ComponentState>,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("config io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config file name {0:?}")]
    InvalidName(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> SettingsError + '_ {
    move |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

const DEFAULT_CONFIG: &str = "{\n  \"components\": {}\n}";

/// Named component states plus the directory they are persisted in.
pub struct ConfigStore {
    dir: PathBuf,
    components: HashMap<String, ComponentState>,
    current: Option<String>,
    files: Vec<String>,
}

impl ConfigStore {
    /// Opens a store over `dir`, creating it and seeding `default.json` and
    /// `example.json` if the directory does not exist yet.
    pub fn initialize(dir: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(io_err(&dir))?;
            info!(dir = %dir.display(), "created config directory");
            Self::create_default_configs(&dir)?;
        } else {
            debug!(dir = %dir.display(), "config directory already exists");
        }

        let mut store = ConfigStore {
            dir,
            components: HashMap::new(),
            current: None,
            files: Vec::new(),
        };
        store.refresh()?;
        Ok(store)
    }

    fn create_default_configs(dir: &Path) -> Result<(), SettingsError> {
        let default_path = dir.join("default.json");
        fs::write(&default_path, DEFAULT_CONFIG).map_err(io_err(&default_path))?;

        let example = ComponentState {
            id: "Window1".to_string(),
            is_open: true,
            position: [100.0, 100.0],
            size: [300.0, 200.0],
            slider_float: 0.5,
            slider_int: 42,
            checkbox: true,
            color: [1.0, 0.0, 0.0, 1.0],
        };
        let mut doc = ConfigDocument::default();
        doc.components.insert(example.id.clone(), example);

        let example_path = dir.join("example.json");
        write_document(&example_path, &doc)?;
        info!(dir = %dir.display(), "created default configs");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Registers a component with default state. No-op if already present.
    pub fn add_component(&mut self, id: &str) {
        self.components
            .entry(id.to_string())
            .or_insert_with(|| ComponentState {
                id: id.to_string(),
                ..ComponentState::default()
            });
    }

    pub fn component(&self, id: &str) -> Option<&ComponentState> {
        self.components.get(id)
    }

    pub fn component_mut(&mut self, id: &str) -> Option<&mut ComponentState> {
        self.components.get_mut(id)
    }

    pub fn components(&self) -> impl Iterator<Item = &ComponentState> {
        self.components.values()
    }

    fn file_path(&self, name: &str) -> Result<PathBuf, SettingsError> {
        if is_plain_name(name) {
            Ok(self.dir.join(name))
        } else {
            Err(SettingsError::InvalidName(name.to_string()))
        }
    }

    /// Writes every component to `<dir>/<name>`.
    pub fn save(&mut self, name: &str) -> Result<(), SettingsError> {
        let path = self.file_path(name)?;
        let doc = ConfigDocument {
            components: self
                .components
                .iter()
                .map(|(id, state)| (id.clone(), state.clone()))
                .collect(),
        };
        write_document(&path, &doc)?;

        self.current = Some(name.to_string());
        self.refresh()?;
        debug!(file = name, components = doc.components.len(), "config saved");
        Ok(())
    }

    /// Saves to `config_<unix seconds>.json` and returns the file name.
    pub fn save_timestamped(&mut self) -> Result<String, SettingsError> {
        let name = format!("config_{}.json", Local::now().timestamp());
        self.save(&name)?;
        Ok(name)
    }

    /// Merges the components stored in `<dir>/<name>` into this store.
    ///
    /// Components absent from the file keep their current state; fields
    /// absent from a stored component take their defaults.
    pub fn load(&mut self, name: &str) -> Result<(), SettingsError> {
        let path = self.file_path(name)?;
        let text = fs::read_to_string(&path).map_err(io_err(&path))?;
        let doc: ConfigDocument =
            serde_json::from_str(&text).map_err(|source| SettingsError::Json {
                path: path.clone(),
                source,
            })?;

        let loaded = doc.components.len();
        for (id, mut state) in doc.components {
            if state.id.is_empty() {
                state.id = id.clone();
            }
            self.components.insert(id, state);
        }
        self.current = Some(name.to_string());
        debug!(file = name, components = loaded, "config loaded");
        Ok(())
    }

    /// Re-scans the directory for `*.json` files.
    pub fn refresh(&mut self) -> Result<(), SettingsError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err(&self.dir))? {
            let entry = entry.map_err(io_err(&self.dir))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();
        self.files = files;
        Ok(())
    }

    /// Config files found by the last refresh, sorted by name.
    pub fn config_files(&self) -> &[String] {
        &self.files
    }

    /// File most recently saved or loaded.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }
}

fn write_document(path: &Path, doc: &ConfigDocument) -> Result<(), SettingsError> {
    let text = serde_json::to_string_pretty(doc).map_err(|source| SettingsError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(io_err(path))
}
