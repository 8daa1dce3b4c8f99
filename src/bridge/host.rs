//! In-process host object model
//!
//! A small reflected object model standing in for the editor: named classes
//! with a parent chain and flags, typed property declarations, objects
//! holding property values, an index of class assets, and a name table for
//! interned identifiers. Everything here is owned by the host mutation
//! thread (see [`super::executor`]).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Declared type of a property
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyKind {
    /// 32-bit signed integer
    Int,
    /// Double-precision float
    Float,
    /// Boolean
    Bool,
    /// Free text
    Text,
    /// Interned identifier
    Name,
    /// 3-component location/direction
    Vector,
    /// Pitch/yaw/roll rotation
    Rotator,
    /// Any type without a textual conversion
    Opaque(String),
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKind::Int => f.write_str("int"),
            PropertyKind::Float => f.write_str("float"),
            PropertyKind::Bool => f.write_str("bool"),
            PropertyKind::Text => f.write_str("string"),
            PropertyKind::Name => f.write_str("name"),
            PropertyKind::Vector => f.write_str("vector"),
            PropertyKind::Rotator => f.write_str("rotator"),
            PropertyKind::Opaque(type_name) => f.write_str(type_name),
        }
    }
}

/// Vector value
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    /// X component
    pub x: f64,
    /// Y component
    pub y: f64,
    /// Z component
    pub z: f64,
}

/// Rotator value, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotator {
    /// Rotation around the right axis
    pub pitch: f64,
    /// Rotation around the up axis
    pub yaw: f64,
    /// Rotation around the forward axis
    pub roll: f64,
}

/// Interned identifier. Compares case-insensitively, like host names do.
#[derive(Debug, Clone)]
pub struct Name(Arc<str>);

impl Name {
    /// The canonical spelling
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether two names share the same interned storage
    pub fn ptr_eq(&self, other: &Name) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Table of interned names; the first spelling seen wins
#[derive(Debug, Default)]
pub struct NameTable {
    names: HashMap<String, Name>,
}

impl NameTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `text`, returning the shared name.
    pub fn intern(&mut self, text: &str) -> Name {
        self.names
            .entry(text.to_ascii_lowercase())
            .or_insert_with(|| Name(Arc::from(text)))
            .clone()
    }

    /// Number of distinct names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when nothing has been interned
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A property value
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Integer value
    Int(i32),
    /// Float value
    Float(f64),
    /// Boolean value
    Bool(bool),
    /// Text value
    Text(String),
    /// Interned name
    Name(Name),
    /// Vector value
    Vector(Vector3),
    /// Rotator value
    Rotator(Rotator),
    /// Value of a type with no textual form
    Opaque,
}

impl PropertyValue {
    /// Render as the text the mutator accepts back.
    pub fn to_text(&self) -> String {
        match self {
            PropertyValue::Int(v) => v.to_string(),
            PropertyValue::Float(v) => v.to_string(),
            PropertyValue::Bool(v) => v.to_string(),
            PropertyValue::Text(v) => v.clone(),
            PropertyValue::Name(v) => v.to_string(),
            PropertyValue::Vector(v) => format!("{},{},{}", v.x, v.y, v.z),
            PropertyValue::Rotator(v) => format!("{},{},{}", v.pitch, v.yaw, v.roll),
            PropertyValue::Opaque => String::new(),
        }
    }
}

/// A property declaration on a class
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDecl {
    /// Property name
    pub name: String,
    /// Declared type
    pub kind: PropertyKind,
    /// Value new objects start with
    pub default: PropertyValue,
}

impl PropertyDecl {
    /// Declare a property with an explicit default.
    pub fn new(name: &str, kind: PropertyKind, default: PropertyValue) -> Self {
        Self {
            name: name.to_string(),
            kind,
            default,
        }
    }

    /// Declare a property of a type that has no textual conversion.
    pub fn opaque(name: &str, type_name: &str) -> Self {
        Self::new(
            name,
            PropertyKind::Opaque(type_name.to_string()),
            PropertyValue::Opaque,
        )
    }
}

/// Class flags that block instantiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassFlags {
    /// Cannot be instantiated directly
    pub is_abstract: bool,
    /// Kept only for old content
    pub deprecated: bool,
    /// Interface-only type
    pub interface: bool,
}

/// A reflected class
#[derive(Debug, Clone, PartialEq)]
pub struct ClassInfo {
    /// Class name
    pub name: String,
    /// Parent class name; `None` only for the root
    pub parent: Option<String>,
    /// Instantiation flags
    pub flags: ClassFlags,
    /// Properties declared directly on this class
    pub properties: Vec<PropertyDecl>,
}

impl ClassInfo {
    /// A concrete class with no properties of its own.
    pub fn new(name: &str, parent: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            flags: ClassFlags::default(),
            properties: Vec::new(),
        }
    }

    /// Add a property declaration.
    pub fn with_property(mut self, decl: PropertyDecl) -> Self {
        self.properties.push(decl);
        self
    }

    /// Replace the flags.
    pub fn with_flags(mut self, flags: ClassFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Why the class cannot be instantiated, if it cannot.
    pub fn instantiation_blocker(&self) -> Option<&'static str> {
        if self.flags.interface {
            Some("interface")
        } else if self.flags.is_abstract {
            Some("abstract")
        } else if self.flags.deprecated {
            Some("deprecated")
        } else {
            None
        }
    }
}

/// Class catalog keyed by case-insensitive name
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: HashMap<String, ClassInfo>,
}

impl ClassRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the engine's base classes
    pub fn with_builtin_classes() -> Self {
        use PropertyKind as K;
        use PropertyValue as V;

        let mut registry = Self::new();
        registry.register(ClassInfo::new("Object", None));
        registry.register(
            ClassInfo::new("Actor", Some("Object"))
                .with_property(PropertyDecl::new("bHidden", K::Bool, V::Bool(false)))
                .with_property(PropertyDecl::new("bCanBeDamaged", K::Bool, V::Bool(true)))
                .with_property(PropertyDecl::new("InitialLifeSpan", K::Float, V::Float(0.0)))
                .with_property(PropertyDecl::new("CustomTimeDilation", K::Float, V::Float(1.0)))
                .with_property(PropertyDecl::new(
                    "SpawnLocation",
                    K::Vector,
                    V::Vector(Vector3::default()),
                ))
                .with_property(PropertyDecl::new(
                    "SpawnRotation",
                    K::Rotator,
                    V::Rotator(Rotator::default()),
                ))
                .with_property(PropertyDecl::opaque("Owner", "ObjectReference")),
        );
        registry.register(
            ClassInfo::new("Pawn", Some("Actor"))
                .with_property(PropertyDecl::new("BaseEyeHeight", K::Float, V::Float(64.0)))
                .with_property(PropertyDecl::new(
                    "bUseControllerRotationYaw",
                    K::Bool,
                    V::Bool(true),
                )),
        );
        registry.register(
            ClassInfo::new("Character", Some("Pawn"))
                .with_property(PropertyDecl::new("Health", K::Int, V::Int(100)))
                .with_property(PropertyDecl::new("JumpMaxCount", K::Int, V::Int(1)))
                .with_property(PropertyDecl::new("MaxWalkSpeed", K::Float, V::Float(600.0)))
                .with_property(PropertyDecl::new(
                    "DisplayName",
                    K::Text,
                    V::Text(String::new()),
                ))
                .with_property(PropertyDecl::new(
                    "CharacterTag",
                    K::Name,
                    V::Name(Name(Arc::from("None"))),
                )),
        );
        registry.register(
            ClassInfo::new("ActorComponent", Some("Object"))
                .with_property(PropertyDecl::new("bAutoActivate", K::Bool, V::Bool(true))),
        );
        registry.register(
            ClassInfo::new("SceneComponent", Some("ActorComponent"))
                .with_property(PropertyDecl::new(
                    "RelativeLocation",
                    K::Vector,
                    V::Vector(Vector3::default()),
                ))
                .with_property(PropertyDecl::new(
                    "RelativeRotation",
                    K::Rotator,
                    V::Rotator(Rotator::default()),
                ))
                .with_property(PropertyDecl::new(
                    "RelativeScale3D",
                    K::Vector,
                    V::Vector(Vector3 {
                        x: 1.0,
                        y: 1.0,
                        z: 1.0,
                    }),
                ))
                .with_property(PropertyDecl::new("bVisible", K::Bool, V::Bool(true))),
        );
        registry.register(
            ClassInfo::new("StaticMeshComponent", Some("SceneComponent"))
                .with_property(PropertyDecl::opaque("StaticMesh", "StaticMeshReference")),
        );
        registry.register(
            ClassInfo::new("UserWidget", Some("Object"))
                .with_property(PropertyDecl::new("bIsFocusable", K::Bool, V::Bool(false)))
                .with_property(PropertyDecl::opaque("ColorAndOpacity", "LinearColor")),
        );
        registry.register(ClassInfo::new("Interface", Some("Object")).with_flags(ClassFlags {
            is_abstract: true,
            interface: true,
            ..ClassFlags::default()
        }));
        registry.register(ClassInfo::new("LegacyActor", Some("Actor")).with_flags(ClassFlags {
            deprecated: true,
            ..ClassFlags::default()
        }));
        registry
    }

    /// Add or replace a class. Returns true when the name was new.
    pub fn register(&mut self, class: ClassInfo) -> bool {
        self.classes
            .insert(class.name.to_ascii_lowercase(), class)
            .is_none()
    }

    /// Look a class up by name.
    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(&name.to_ascii_lowercase())
    }

    /// Whether `class` is `ancestor` or derives from it.
    pub fn is_child_of(&self, class: &str, ancestor: &str) -> bool {
        self.lineage(class)
            .any(|info| info.name.eq_ignore_ascii_case(ancestor))
    }

    /// Find a property on `class` or any of its ancestors.
    pub fn find_property(&self, class: &str, property: &str) -> Option<&PropertyDecl> {
        self.lineage(class).find_map(|info| {
            info.properties
                .iter()
                .find(|decl| decl.name.eq_ignore_ascii_case(property))
        })
    }

    /// Build an object of `class` with every inherited property at its default.
    pub fn instantiate(&self, class: &str) -> Option<HostObject> {
        let info = self.get(class)?;
        let mut properties = HashMap::new();
        for ancestor in self.lineage(&info.name) {
            for decl in &ancestor.properties {
                properties
                    .entry(decl.name.clone())
                    .or_insert_with(|| decl.default.clone());
            }
        }
        Some(HostObject {
            class: info.name.clone(),
            properties,
            modified: false,
        })
    }

    /// Number of registered classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True when no class is registered
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    fn lineage<'a>(&'a self, class: &str) -> impl Iterator<Item = &'a ClassInfo> + 'a {
        let mut next = self.get(class);
        let mut depth = 0usize;
        let limit = self.classes.len();
        std::iter::from_fn(move || {
            let current = next?;
            depth += 1;
            next = if depth > limit {
                None
            } else {
                current.parent.as_deref().and_then(|p| self.get(p))
            };
            Some(current)
        })
    }
}

/// An object instance
#[derive(Debug, Clone, PartialEq)]
pub struct HostObject {
    /// Class name
    pub class: String,
    properties: HashMap<String, PropertyValue>,
    modified: bool,
}

impl HostObject {
    /// Current value of a property, by declared name
    pub fn get(&self, property: &str) -> Option<&PropertyValue> {
        self.properties.get(property)
    }

    /// Write a property in one step and mark the object modified.
    pub fn assign(&mut self, property: &str, value: PropertyValue) {
        self.properties.insert(property.to_string(), value);
        self.modified = true;
    }

    /// Whether the object changed since creation or the last save
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Clear the modified flag.
    pub fn clear_modified(&mut self) {
        self.modified = false;
    }
}

/// A component slot on a class asset
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSlot {
    /// Slot name, unique within the asset
    pub name: String,
    /// Component object
    pub template: HostObject,
}

/// Compilation status of a class asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileStatus {
    /// Changed since the last compile
    Dirty,
    /// Compiled without problems
    UpToDate,
    /// Last compile found a problem
    Error,
}

/// A class asset created under a parent class
#[derive(Debug, Clone, PartialEq)]
pub struct ClassAsset {
    /// Asset name
    pub name: String,
    /// Namespace the asset lives in, ending with '/'
    pub package: String,
    /// Parent class name
    pub parent_class: String,
    /// Default object whose properties remote callers edit
    pub defaults: HostObject,
    /// Components added to the asset
    pub components: Vec<ComponentSlot>,
    /// Containing unit has unsaved changes
    pub package_dirty: bool,
    /// Compilation status
    pub status: CompileStatus,
}

impl ClassAsset {
    /// Full asset path
    pub fn path(&self) -> String {
        format!("{}{}", self.package, self.name)
    }

    /// Mark the asset and its containing unit modified.
    pub fn mark_dirty(&mut self) {
        self.package_dirty = true;
        self.status = CompileStatus::Dirty;
    }
}

/// Index of class assets keyed by full path
#[derive(Debug, Default)]
pub struct AssetIndex {
    assets: BTreeMap<String, ClassAsset>,
}

impl AssetIndex {
    /// Whether an asset exists at `path`
    pub fn contains(&self, path: &str) -> bool {
        self.assets.contains_key(path)
    }

    /// Register an asset at its full path.
    pub fn insert(&mut self, asset: ClassAsset) {
        self.assets.insert(asset.path(), asset);
    }

    /// Asset at `path`
    pub fn get(&self, path: &str) -> Option<&ClassAsset> {
        self.assets.get(path)
    }

    /// Mutable asset at `path`
    pub fn get_mut(&mut self, path: &str) -> Option<&mut ClassAsset> {
        self.assets.get_mut(path)
    }

    /// Number of assets
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// True when no asset exists
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// All asset paths, sorted
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.assets.keys().map(String::as_str)
    }
}

/// The host: class catalog, asset index and name table
#[derive(Debug)]
pub struct Host {
    /// Reflected classes
    pub classes: ClassRegistry,
    /// Class assets
    pub assets: AssetIndex,
    /// Interned names
    pub names: NameTable,
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

impl Host {
    /// Host with the built-in classes and no assets
    pub fn new() -> Self {
        Self {
            classes: ClassRegistry::with_builtin_classes(),
            assets: AssetIndex::default(),
            names: NameTable::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_are_inherited_and_case_insensitive() {
        let classes = ClassRegistry::with_builtin_classes();
        let decl = classes.find_property("Character", "spawnlocation").unwrap();
        assert_eq!(decl.name, "SpawnLocation");
        assert_eq!(decl.kind, PropertyKind::Vector);
        assert!(classes.find_property("Actor", "Health").is_none());

        let object = classes.instantiate("character").unwrap();
        assert_eq!(object.class, "Character");
        assert_eq!(object.get("Health"), Some(&PropertyValue::Int(100)));
        assert_eq!(object.get("bHidden"), Some(&PropertyValue::Bool(false)));
        assert!(!object.is_modified());
    }

    #[test]
    fn lineage_checks() {
        let classes = ClassRegistry::with_builtin_classes();
        assert!(classes.is_child_of("StaticMeshComponent", "ActorComponent"));
        assert!(classes.is_child_of("Character", "Actor"));
        assert!(!classes.is_child_of("Character", "ActorComponent"));
        assert!(!classes.is_child_of("Missing", "Object"));
    }

    #[test]
    fn blockers_follow_flags() {
        let classes = ClassRegistry::with_builtin_classes();
        assert_eq!(classes.get("Interface").unwrap().instantiation_blocker(), Some("interface"));
        assert_eq!(
            classes.get("LegacyActor").unwrap().instantiation_blocker(),
            Some("deprecated")
        );
        assert_eq!(classes.get("Actor").unwrap().instantiation_blocker(), None);
    }

    #[test]
    fn cyclic_parents_terminate() {
        let mut classes = ClassRegistry::new();
        classes.register(ClassInfo::new("A", Some("B")));
        classes.register(ClassInfo::new("B", Some("A")));
        assert!(!classes.is_child_of("A", "C"));
    }

    #[test]
    fn names_intern_case_insensitively() {
        let mut names = NameTable::new();
        let first = names.intern("PlayerStart");
        let second = names.intern("playerstart");
        assert!(first.ptr_eq(&second));
        assert_eq!(second.as_str(), "PlayerStart");
        assert_eq!(names.len(), 1);
    }
}
