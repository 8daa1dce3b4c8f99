//! Property mutator
//!
//! Turns a (property name, text value, optional type hint) triple into a
//! typed write. The whole value is parsed before anything is written, and
//! the write is a single assignment, so a rejected mutation leaves the
//! target untouched.

use serde::{Deserialize, Serialize};

use super::error::{MutationError, MutationResult};
use super::host::{
    ClassRegistry, HostObject, NameTable, PropertyKind, PropertyValue, Rotator, Vector3,
};

/// One property write request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Path of the object to modify
    pub target_path: String,
    /// Property to write
    pub property_name: String,
    /// Value as text
    pub raw_value: String,
    /// Conversion to use instead of the declared type
    pub type_hint: Option<String>,
}

impl PropertySpec {
    /// A spec without a type hint.
    pub fn new(target_path: &str, property_name: &str, raw_value: &str) -> Self {
        Self {
            target_path: target_path.to_string(),
            property_name: property_name.to_string(),
            raw_value: raw_value.to_string(),
            type_hint: None,
        }
    }

    /// Attach a type hint.
    pub fn with_hint(mut self, hint: &str) -> Self {
        self.type_hint = Some(hint.to_string());
        self
    }
}

/// Writes property values on host objects
pub struct PropertyMutator<'a> {
    classes: &'a ClassRegistry,
    names: &'a mut NameTable,
}

impl<'a> PropertyMutator<'a> {
    /// Mutator resolving declarations in `classes` and interning into `names`
    pub fn new(classes: &'a ClassRegistry, names: &'a mut NameTable) -> Self {
        Self { classes, names }
    }

    /// Apply `spec` to `target`, returning the value written.
    pub fn apply(
        &mut self,
        target: &mut HostObject,
        spec: &PropertySpec,
    ) -> MutationResult<PropertyValue> {
        let classes = self.classes;
        let decl = classes
            .find_property(&target.class, &spec.property_name)
            .ok_or_else(|| MutationError::PropertyNotFound {
                property: spec.property_name.clone(),
                class: target.class.clone(),
            })?;

        let kind = match spec.type_hint.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            Some(hint) => {
                let hinted = kind_from_hint(hint)
                    .ok_or_else(|| MutationError::UnsupportedType(hint.to_string()))?;
                if hinted != decl.kind {
                    return Err(MutationError::TypeMismatch {
                        property: decl.name.clone(),
                        hint: hint.to_string(),
                        declared: decl.kind.to_string(),
                    });
                }
                hinted
            }
            None => decl.kind.clone(),
        };

        let value = self.convert(&decl.name, &kind, &spec.raw_value)?;
        target.assign(&decl.name, value.clone());
        Ok(value)
    }

    fn convert(
        &mut self,
        property: &str,
        kind: &PropertyKind,
        raw: &str,
    ) -> MutationResult<PropertyValue> {
        let conversion = |detail: String| MutationError::Conversion {
            property: property.to_string(),
            kind: kind.to_string(),
            value: raw.to_string(),
            detail,
        };

        match kind {
            PropertyKind::Int => raw
                .trim()
                .parse::<i32>()
                .map(PropertyValue::Int)
                .map_err(|err| conversion(err.to_string())),
            PropertyKind::Float => parse_float(raw)
                .map(PropertyValue::Float)
                .map_err(conversion),
            PropertyKind::Bool => parse_bool(raw).map(PropertyValue::Bool).map_err(conversion),
            PropertyKind::Text => Ok(PropertyValue::Text(raw.to_string())),
            PropertyKind::Name => Ok(PropertyValue::Name(self.names.intern(raw))),
            PropertyKind::Vector => {
                let [x, y, z] = parse_triple(raw).map_err(conversion)?;
                Ok(PropertyValue::Vector(Vector3 { x, y, z }))
            }
            PropertyKind::Rotator => {
                let [pitch, yaw, roll] = parse_triple(raw).map_err(conversion)?;
                Ok(PropertyValue::Rotator(Rotator { pitch, yaw, roll }))
            }
            PropertyKind::Opaque(type_name) => {
                Err(MutationError::UnsupportedType(type_name.clone()))
            }
        }
    }
}

/// Map a caller-supplied type hint to a property kind.
pub fn kind_from_hint(hint: &str) -> Option<PropertyKind> {
    let kind = match hint.trim().to_ascii_lowercase().as_str() {
        "int" | "int32" | "integer" => PropertyKind::Int,
        "float" | "double" | "real" => PropertyKind::Float,
        "bool" | "boolean" => PropertyKind::Bool,
        "string" | "str" | "text" => PropertyKind::Text,
        "name" => PropertyKind::Name,
        "vector" | "vec3" => PropertyKind::Vector,
        "rotator" | "rotation" => PropertyKind::Rotator,
        _ => return None,
    };
    Some(kind)
}

fn parse_float(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.trim().parse().map_err(|err: std::num::ParseFloatError| err.to_string())?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err("value is not finite".to_string())
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") || trimmed == "1" {
        Ok(true)
    } else if trimmed.eq_ignore_ascii_case("false") || trimmed == "0" {
        Ok(false)
    } else {
        Err("expected true, false, 1 or 0".to_string())
    }
}

fn parse_triple(raw: &str) -> Result<[f64; 3], String> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 3 {
        return Err(format!("expected 3 comma-separated components, got {}", parts.len()));
    }
    let mut out = [0.0; 3];
    for (slot, part) in out.iter_mut().zip(&parts) {
        *slot = parse_float(part).map_err(|err| format!("component '{}': {err}", part.trim()))?;
    }
    Ok(out)
}
