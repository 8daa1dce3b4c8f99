//! Class asset factory
//!
//! Creates class assets under a parent class and edits their structure
//! (components, compilation). Every input is validated before the asset
//! index is touched; an existing asset is never overwritten.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::BridgeConfig;
use super::error::{FactoryError, FactoryResult};
use super::host::{AssetIndex, ClassAsset, CompileStatus, ComponentSlot, Host};

/// Parent classes advertised to remote callers
pub const SUPPORTED_PARENT_CLASSES: &[&str] = &[
    "Actor",
    "Pawn",
    "Character",
    "ActorComponent",
    "SceneComponent",
    "UserWidget",
    "Object",
];

/// Base class every component class derives from
pub const COMPONENT_BASE_CLASS: &str = "ActorComponent";

const MAX_NAME_LEN: usize = 64;
const DISALLOWED_PATH_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '\\'];

/// Input to [`ClassAssetFactory::create`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassAssetDescriptor {
    /// Asset name
    pub name: String,
    /// Parent class name
    pub parent_class_name: String,
    /// Namespace the asset is created in
    pub namespace_path: String,
}

/// Path rules applied by the factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactorySettings {
    /// Namespace every asset path must live under
    pub content_root: String,
    /// Namespace used when none is given
    pub default_asset_path: String,
    /// Prefixes whose assets reject modification
    pub protected_paths: Vec<String>,
}

impl From<&BridgeConfig> for FactorySettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            content_root: config.content_root.clone(),
            default_asset_path: config.default_asset_path.clone(),
            protected_paths: config.protected_paths.clone(),
        }
    }
}

impl Default for FactorySettings {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl FactorySettings {
    fn is_protected(&self, path: &str) -> bool {
        self.protected_paths
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }
}

/// Creates and edits class assets in a [`Host`]
pub struct ClassAssetFactory<'a> {
    host: &'a mut Host,
    settings: &'a FactorySettings,
}

impl<'a> ClassAssetFactory<'a> {
    /// Factory operating on `host`
    pub fn new(host: &'a mut Host, settings: &'a FactorySettings) -> Self {
        Self { host, settings }
    }

    /// Create a class asset and return its full path.
    pub fn create(&mut self, descriptor: &ClassAssetDescriptor) -> FactoryResult<String> {
        validate_name(&descriptor.name)?;
        let package = validate_path(&descriptor.namespace_path, &self.settings.content_root)?;

        let parent = descriptor.parent_class_name.trim();
        if parent.is_empty() {
            return Err(FactoryError::ParentNotFound(String::new()));
        }
        let class = self
            .host
            .classes
            .get(parent)
            .ok_or_else(|| FactoryError::ParentNotFound(parent.to_string()))?;
        if let Some(reason) = class.instantiation_blocker() {
            return Err(FactoryError::NotInstantiable {
                class: class.name.clone(),
                reason,
            });
        }
        let parent_class = class.name.clone();

        let path = format!("{package}{}", descriptor.name);
        if self.host.assets.contains(&path) {
            return Err(FactoryError::Collision(path));
        }

        let defaults = self
            .host
            .classes
            .instantiate(&parent_class)
            .ok_or_else(|| FactoryError::ParentNotFound(parent_class.clone()))?;
        let mut asset = ClassAsset {
            name: descriptor.name.clone(),
            package,
            parent_class,
            defaults,
            components: Vec::new(),
            package_dirty: false,
            status: CompileStatus::Dirty,
        };
        asset.mark_dirty();
        self.host.assets.insert(asset);

        info!(path = %path, parent = %descriptor.parent_class_name, "Class asset created");
        Ok(path)
    }

    /// Add a component slot to an existing asset and return the asset path.
    pub fn add_component(
        &mut self,
        asset_path: &str,
        component_type: &str,
        component_name: &str,
    ) -> FactoryResult<String> {
        validate_name(component_name)?;

        let classes = &self.host.classes;
        let class = classes
            .get(component_type)
            .or_else(|| classes.get(&format!("{component_type}Component")))
            .ok_or_else(|| FactoryError::ComponentClassNotFound(component_type.to_string()))?;
        if !classes.is_child_of(&class.name, COMPONENT_BASE_CLASS) {
            return Err(FactoryError::NotAComponent(class.name.clone()));
        }
        if let Some(reason) = class.instantiation_blocker() {
            return Err(FactoryError::NotInstantiable {
                class: class.name.clone(),
                reason,
            });
        }
        let template = classes
            .instantiate(&class.name)
            .ok_or_else(|| FactoryError::ComponentClassNotFound(component_type.to_string()))?;

        let asset = editable_asset(&mut self.host.assets, self.settings, asset_path)?;
        if asset
            .components
            .iter()
            .any(|slot| slot.name.eq_ignore_ascii_case(component_name))
        {
            return Err(FactoryError::DuplicateComponent {
                asset: asset_path.to_string(),
                component: component_name.to_string(),
            });
        }

        asset.components.push(ComponentSlot {
            name: component_name.to_string(),
            template,
        });
        asset.mark_dirty();

        info!(path = %asset_path, component = %component_name, "Component added");
        Ok(asset_path.to_string())
    }

    /// Compile an asset, recording the resulting status.
    pub fn compile(&mut self, asset_path: &str) -> FactoryResult<String> {
        let classes = &self.host.classes;
        let asset = editable_asset(&mut self.host.assets, self.settings, asset_path)?;

        let mut problem = match classes.get(&asset.parent_class) {
            None => Some(format!("parent class '{}' no longer exists", asset.parent_class)),
            Some(parent) => parent
                .instantiation_blocker()
                .map(|reason| format!("parent class '{}' is {reason}", parent.name)),
        };
        if problem.is_none() {
            problem = asset
                .components
                .iter()
                .find(|slot| !classes.is_child_of(&slot.template.class, COMPONENT_BASE_CLASS))
                .map(|slot| format!("component '{}' has an invalid class", slot.name));
        }

        match problem {
            Some(detail) => {
                asset.status = CompileStatus::Error;
                warn!(path = %asset_path, detail = %detail, "Compilation failed");
                Err(FactoryError::CompileFailed {
                    path: asset_path.to_string(),
                    detail,
                })
            }
            None => {
                asset.status = CompileStatus::UpToDate;
                info!(path = %asset_path, "Class asset compiled");
                Ok(asset_path.to_string())
            }
        }
    }
}

/// Look up an asset for modification, refusing protected paths.
pub fn editable_asset<'h>(
    assets: &'h mut AssetIndex,
    settings: &FactorySettings,
    path: &str,
) -> FactoryResult<&'h mut ClassAsset> {
    if settings.is_protected(path) {
        return Err(FactoryError::Protected(path.to_string()));
    }
    assets
        .get_mut(path)
        .ok_or_else(|| FactoryError::AssetNotFound(path.to_string()))
}

/// Check an asset or component name.
pub fn validate_name(name: &str) -> FactoryResult<()> {
    let invalid = |reason| {
        Err(FactoryError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };

    let Some(first) = name.chars().next() else {
        return invalid("name is empty");
    };
    if name.chars().count() > MAX_NAME_LEN {
        return invalid("name is longer than 64 characters");
    }
    if !(first.is_ascii_alphabetic() || first == '_') {
        return invalid("name must start with a letter or underscore");
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return invalid("name may contain only letters, digits and underscores");
    }
    Ok(())
}

/// Check a namespace path and return it with a trailing '/'.
pub fn validate_path(path: &str, content_root: &str) -> FactoryResult<String> {
    let invalid = |reason| {
        Err(FactoryError::InvalidPath {
            path: path.to_string(),
            reason,
        })
    };

    if path.is_empty() {
        return invalid("path is empty");
    }
    if path.contains("..") {
        return invalid("path must not contain '..'");
    }
    if path.contains(DISALLOWED_PATH_CHARS) {
        return invalid("path contains a disallowed character");
    }
    if path.chars().any(char::is_whitespace) {
        return invalid("path must not contain whitespace");
    }

    let normalized = if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    };
    if !normalized.starts_with(content_root) {
        return invalid("path is outside the content root");
    }
    if normalized.contains("//") {
        return invalid("path contains an empty segment");
    }
    Ok(normalized)
}
