//! Command dispatcher
//!
//! Routes inbound requests to the factory and mutator and packages the
//! outcome into a response carrying the request's id. Domain failures
//! become `{"success": false, "error": ...}` results; only a method outside
//! the vocabulary or unusable params produce a JSON-RPC error member.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use super::codec::{Envelope, INVALID_PARAMS, MessageKind, RpcError};
use super::factory::{
    ClassAssetDescriptor, ClassAssetFactory, FactorySettings, SUPPORTED_PARENT_CLASSES,
    editable_asset,
};
use super::host::Host;
use super::mutator::{PropertyMutator, PropertySpec};
use super::BridgeConfig;

/// Methods understood by the dispatcher
pub const SUPPORTED_OPERATIONS: &[&str] = &[
    "create_blueprint",
    "set_blueprint_property",
    "add_component",
    "compile_blueprint",
    "get_server_status",
];

/// Outcome of one command handler
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OperationResult {
    /// Whether the operation succeeded
    pub success: bool,
    /// Failure message
    pub error_message: Option<String>,
    /// Path of the asset the operation produced or touched
    pub result_path: Option<String>,
    /// Free-form textual result
    pub result_data: Option<String>,
    /// Additional result fields
    pub extra: Map<String, Value>,
}

impl OperationResult {
    /// A successful result
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// A failed result
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Attach the affected asset path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.result_path = Some(path.into());
        self
    }

    /// Attach textual result data.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.result_data = Some(data.into());
        self
    }

    /// Attach an extra field.
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// Wire form of the result.
    pub fn to_value(&self) -> Value {
        if !self.success {
            return json!({
                "success": false,
                "error": self.error_message.clone().unwrap_or_default(),
            });
        }

        let mut map = Map::new();
        map.insert("success".to_string(), Value::Bool(true));
        if let Some(path) = &self.result_path {
            map.insert("blueprint_path".to_string(), Value::String(path.clone()));
        }
        if let Some(data) = &self.result_data {
            map.insert("result_data".to_string(), Value::String(data.clone()));
        }
        for (key, value) in &self.extra {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        map.entry("timestamp".to_string())
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        Value::Object(map)
    }
}

impl<E: std::fmt::Display> From<Result<String, E>> for OperationResult {
    fn from(result: Result<String, E>) -> Self {
        match result {
            Ok(path) => OperationResult::ok().with_path(path),
            Err(err) => OperationResult::failure(err.to_string()),
        }
    }
}

/// Errors reported as JSON-RPC error members
#[derive(Debug, Clone, PartialEq, Eq)]
enum CommandError {
    MethodNotFound(String),
    InvalidParams(String),
}

impl CommandError {
    fn into_rpc(self) -> RpcError {
        match self {
            CommandError::MethodNotFound(method) => RpcError::method_not_found(&method),
            CommandError::InvalidParams(detail) => RpcError {
                code: INVALID_PARAMS,
                message: detail,
                data: None,
            },
        }
    }
}

/// Maps inbound commands onto host operations
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    settings: FactorySettings,
    started_at: DateTime<Utc>,
}

impl CommandDispatcher {
    /// Dispatcher applying the path rules from `config`
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            settings: FactorySettings::from(config),
            started_at: Utc::now(),
        }
    }

    /// Handle one inbound envelope; returns the response for requests.
    ///
    /// Must run on the host mutation thread.
    pub fn handle(&self, host: &mut Host, envelope: &Envelope) -> Option<Envelope> {
        if envelope.kind == MessageKind::Response {
            return None;
        }
        let method = envelope.method_name();
        let reply_id = match envelope.kind {
            MessageKind::Request => envelope.request_id().map(str::to_string),
            _ => None,
        };

        let outcome = decode_params(envelope.params.as_ref())
            .and_then(|params| self.dispatch(host, method, &params));

        let Some(id) = reply_id else {
            match outcome {
                Ok(_) => debug!(method, "Notification handled"),
                Err(err) => debug!(method, error = ?err, "Notification ignored"),
            }
            return None;
        };

        Some(match outcome {
            Ok(result) => {
                if !result.success {
                    warn!(
                        request_id = %id,
                        method,
                        error = result.error_message.as_deref().unwrap_or(""),
                        "Command failed"
                    );
                }
                envelope.reply(result.to_value())
            }
            Err(err) => {
                warn!(request_id = %id, method, error = ?err, "Command rejected");
                envelope.reply_error(err.into_rpc())
            }
        })
    }

    fn dispatch(
        &self,
        host: &mut Host,
        method: &str,
        params: &Map<String, Value>,
    ) -> Result<OperationResult, CommandError> {
        let result = match method {
            "create_blueprint" => self.cmd_create_blueprint(host, params),
            "set_blueprint_property" | "set_property" => self.cmd_set_property(host, params),
            "add_component" => self.cmd_add_component(host, params),
            "compile_blueprint" => self.cmd_compile_blueprint(host, params),
            "get_server_status" => self.cmd_get_server_status(host),
            other => return Err(CommandError::MethodNotFound(other.to_string())),
        };
        Ok(result)
    }

    fn cmd_create_blueprint(
        &self,
        host: &mut Host,
        params: &Map<String, Value>,
    ) -> OperationResult {
        let name = match required_str(params, "blueprint_name") {
            Ok(name) => name,
            Err(failure) => return failure,
        };
        let parent = match required_str(params, "parent_class") {
            Ok(parent) => parent,
            Err(failure) => return failure,
        };
        let path = optional_str(params, "asset_path")
            .filter(|path| !path.is_empty())
            .unwrap_or(self.settings.default_asset_path.as_str());

        let descriptor = ClassAssetDescriptor {
            name: name.to_string(),
            parent_class_name: parent.to_string(),
            namespace_path: path.to_string(),
        };
        ClassAssetFactory::new(host, &self.settings)
            .create(&descriptor)
            .into()
    }

    fn cmd_set_property(&self, host: &mut Host, params: &Map<String, Value>) -> OperationResult {
        let path = match required_str(params, "blueprint_path") {
            Ok(path) => path,
            Err(failure) => return failure,
        };
        let property = match required_str(params, "property_name") {
            Ok(property) => property,
            Err(failure) => return failure,
        };
        let raw_value = match params.get("property_value") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => return missing("property_value"),
        };
        let spec = PropertySpec {
            target_path: path.to_string(),
            property_name: property.to_string(),
            raw_value,
            type_hint: optional_str(params, "property_type").map(str::to_string),
        };

        let Host {
            classes,
            assets,
            names,
        } = host;
        let asset = match editable_asset(assets, &self.settings, &spec.target_path) {
            Ok(asset) => asset,
            Err(err) => return OperationResult::failure(err.to_string()),
        };

        match PropertyMutator::new(classes, names).apply(&mut asset.defaults, &spec) {
            Ok(value) => {
                asset.mark_dirty();
                info!(path = %spec.target_path, property = %spec.property_name, "Property set");
                OperationResult::ok()
                    .with_path(spec.target_path.clone())
                    .with_data(value.to_text())
                    .with_field("property_name", Value::String(spec.property_name.clone()))
            }
            Err(err) => OperationResult::failure(err.to_string()),
        }
    }

    fn cmd_add_component(&self, host: &mut Host, params: &Map<String, Value>) -> OperationResult {
        let path = match required_str(params, "blueprint_path") {
            Ok(path) => path,
            Err(failure) => return failure,
        };
        let component_type = match required_str(params, "component_type") {
            Ok(component_type) => component_type,
            Err(failure) => return failure,
        };
        let component_name = match required_str(params, "component_name") {
            Ok(component_name) => component_name,
            Err(failure) => return failure,
        };
        ClassAssetFactory::new(host, &self.settings)
            .add_component(path, component_type, component_name)
            .into()
    }

    fn cmd_compile_blueprint(
        &self,
        host: &mut Host,
        params: &Map<String, Value>,
    ) -> OperationResult {
        let path = match required_str(params, "blueprint_path") {
            Ok(path) => path,
            Err(failure) => return failure,
        };
        ClassAssetFactory::new(host, &self.settings)
            .compile(path)
            .into()
    }

    fn cmd_get_server_status(&self, host: &Host) -> OperationResult {
        OperationResult::ok()
            .with_field("online", Value::Bool(true))
            .with_field("version", json!(crate::VERSION))
            .with_field("plugin_name", json!(crate::PLUGIN_NAME))
            .with_field("protocol_version", json!(crate::PROTOCOL_VERSION))
            .with_field("timestamp", json!(Utc::now().to_rfc3339()))
            .with_field("started_at", json!(self.started_at.to_rfc3339()))
            .with_field("editor_available", Value::Bool(true))
            .with_field("initialized", Value::Bool(true))
            .with_field("asset_count", json!(host.assets.len()))
            .with_field("supported_operations", json!(SUPPORTED_OPERATIONS))
            .with_field("supported_parent_classes", json!(SUPPORTED_PARENT_CLASSES))
    }
}

/// Params may arrive as an object, as a string holding an object, or not at all.
fn decode_params(params: Option<&Value>) -> Result<Map<String, Value>, CommandError> {
    match params {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(Map::new()),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(CommandError::InvalidParams(
                "params string must encode a JSON object".into(),
            )),
            Err(err) => Err(CommandError::InvalidParams(format!(
                "params string is not valid JSON: {err}"
            ))),
        },
        Some(_) => Err(CommandError::InvalidParams("params must be an object".into())),
    }
}

fn missing(param: &str) -> OperationResult {
    OperationResult::failure(format!("missing or invalid parameter: {param}"))
}

fn required_str<'p>(params: &'p Map<String, Value>, key: &str) -> Result<&'p str, OperationResult> {
    optional_str(params, key)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| missing(key))
}

fn optional_str<'p>(params: &'p Map<String, Value>, key: &str) -> Option<&'p str> {
    params.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, params: Value) -> Envelope {
        Envelope::request("req_1", method, params)
    }

    fn result_of(reply: Option<Envelope>) -> Value {
        reply.and_then(|env| env.result).unwrap()
    }

    #[test]
    fn create_uses_default_path_and_echoes_id() {
        let dispatcher = CommandDispatcher::new(&BridgeConfig::default());
        let mut host = Host::new();

        let reply = dispatcher
            .handle(
                &mut host,
                &request(
                    "create_blueprint",
                    json!({"blueprint_name": "Door", "parent_class": "Actor"}),
                ),
            )
            .unwrap();
        assert_eq!(reply.id.as_deref(), Some("req_1"));
        assert_eq!(reply.kind, MessageKind::Response);
        let result = reply.result.unwrap();
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["blueprint_path"], json!("/Game/Blueprints/Door"));
    }

    #[test]
    fn missing_params_fail_inside_the_result() {
        let dispatcher = CommandDispatcher::new(&BridgeConfig::default());
        let mut host = Host::new();
        let result = result_of(dispatcher.handle(
            &mut host,
            &request("create_blueprint", json!({"parent_class": "Actor"})),
        ));
        assert_eq!(
            result,
            json!({"success": false, "error": "missing or invalid parameter: blueprint_name"})
        );
    }

    #[test]
    fn unknown_method_is_an_rpc_error() {
        let dispatcher = CommandDispatcher::new(&BridgeConfig::default());
        let mut host = Host::new();
        let reply = dispatcher
            .handle(&mut host, &request("delete_everything", json!({})))
            .unwrap();
        assert!(reply.result.is_none());
        assert_eq!(reply.error.unwrap()["code"], json!(crate::bridge::codec::METHOD_NOT_FOUND));
    }

    #[test]
    fn notifications_get_no_reply() {
        let dispatcher = CommandDispatcher::new(&BridgeConfig::default());
        let mut host = Host::new();
        let note = Envelope::notification(
            "create_blueprint",
            json!({"blueprint_name": "Quiet", "parent_class": "Actor"}),
        );
        assert!(dispatcher.handle(&mut host, &note).is_none());
        assert!(host.assets.contains("/Game/Blueprints/Quiet"));
        assert!(
            dispatcher
                .handle(&mut host, &Envelope::notification("unknown", json!({})))
                .is_none()
        );
    }

    #[test]
    fn string_params_are_decoded() {
        let dispatcher = CommandDispatcher::new(&BridgeConfig::default());
        let mut host = Host::new();
        let params = Value::String(
            r#"{"blueprint_name":"Lamp","parent_class":"Actor","asset_path":"/Game/Props/"}"#
                .into(),
        );
        let result = result_of(dispatcher.handle(&mut host, &request("create_blueprint", params)));
        assert_eq!(result["blueprint_path"], json!("/Game/Props/Lamp"));

        let reply = dispatcher
            .handle(&mut host, &request("create_blueprint", json!([1, 2])))
            .unwrap();
        assert_eq!(reply.error.unwrap()["code"], json!(INVALID_PARAMS));
    }

    #[test]
    fn set_property_marks_asset_dirty() {
        let dispatcher = CommandDispatcher::new(&BridgeConfig::default());
        let mut host = Host::new();
        dispatcher.handle(
            &mut host,
            &request(
                "create_blueprint",
                json!({"blueprint_name": "Hero", "parent_class": "Character"}),
            ),
        );
        host.assets
            .get_mut("/Game/Blueprints/Hero")
            .unwrap()
            .package_dirty = false;

        let result = result_of(dispatcher.handle(
            &mut host,
            &request(
                "set_property",
                json!({
                    "blueprint_path": "/Game/Blueprints/Hero",
                    "property_name": "MaxWalkSpeed",
                    "property_value": 300
                }),
            ),
        ));
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["result_data"], json!("300"));
        assert!(host.assets.get("/Game/Blueprints/Hero").unwrap().package_dirty);
    }

    #[test]
    fn status_lists_vocabulary() {
        let dispatcher = CommandDispatcher::new(&BridgeConfig::default());
        let mut host = Host::new();
        let status = request("get_server_status", json!({}));
        let result = result_of(dispatcher.handle(&mut host, &status));
        assert_eq!(result["online"], json!(true));
        assert_eq!(result["plugin_name"], json!(crate::PLUGIN_NAME));
        assert_eq!(result["supported_operations"].as_array().unwrap().len(), 5);
        assert_eq!(result["supported_parent_classes"][0], json!("Actor"));
        assert_eq!(result["asset_count"], json!(0));
    }
}
