//! View model handed to the UI-side injector, which appends the listed styles,
//! classic scripts and module scripts to the view named `name`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const INJECT_PROPERTY: &str = "ModInjectModel";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectModel {
    pub name: String,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default)]
    pub modules: Vec<String>,
}

impl InjectModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_styles<I, S>(mut self, styles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.styles.extend(styles.into_iter().map(Into::into));
        self
    }

    pub fn with_scripts<I, S>(mut self, scripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scripts.extend(scripts.into_iter().map(Into::into));
        self
    }

    pub fn with_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modules.extend(modules.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty() && self.scripts.is_empty() && self.modules.is_empty()
    }

    /// Adds this model to a parent view model under `ModInjectModel`.
    pub fn attach(&self, view_model: &mut Map<String, Value>) -> serde_json::Result<()> {
        view_model.insert(INJECT_PROPERTY.to_string(), serde_json::to_value(self)?);
        Ok(())
    }
}
