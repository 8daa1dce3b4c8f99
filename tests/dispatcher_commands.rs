use blueprint_bridge::bridge::BridgeConfig;
use blueprint_bridge::bridge::codec::Envelope;
use blueprint_bridge::bridge::dispatcher::CommandDispatcher;
use blueprint_bridge::bridge::host::{CompileStatus, Host, PropertyValue, Vector3};
use serde_json::{Value, json};

struct Fixture {
    dispatcher: CommandDispatcher,
    host: Host,
    next_id: u32,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dispatcher: CommandDispatcher::new(&BridgeConfig::default()),
            host: Host::new(),
            next_id: 0,
        }
    }

    fn call(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = format!("test_{}", self.next_id);
        let reply = self
            .dispatcher
            .handle(&mut self.host, &Envelope::request(id.as_str(), method, params))
            .expect("requests always get a reply");
        assert_eq!(reply.id.as_deref(), Some(id.as_str()));
        reply.result.expect("command outcomes travel in the result member")
    }

    fn create(&mut self, name: &str, parent: &str) -> Value {
        self.call(
            "create_blueprint",
            json!({"blueprint_name": name, "parent_class": parent, "asset_path": "/Game/Blueprints/"}),
        )
    }

    fn defaults(&self, path: &str, property: &str) -> PropertyValue {
        self.host
            .assets
            .get(path)
            .unwrap()
            .defaults
            .get(property)
            .cloned()
            .unwrap()
    }
}

#[test]
fn create_succeeds_once_then_collides() {
    let mut fx = Fixture::new();

    let first = fx.create("TestActor", "Actor");
    assert_eq!(first["success"], json!(true));
    assert_eq!(first["blueprint_path"], json!("/Game/Blueprints/TestActor"));

    let second = fx.create("TestActor", "Actor");
    assert_eq!(second["success"], json!(false));
    assert!(second["error"].as_str().unwrap().contains("already exists"));
    assert_eq!(fx.host.assets.len(), 1);
}

#[test]
fn create_validation_failures() {
    let mut fx = Fixture::new();

    let cases = [
        (json!({"blueprint_name": "9Lives", "parent_class": "Actor"}), "invalid name"),
        (json!({"blueprint_name": "Ok", "parent_class": "Spaceship"}), "not found"),
        (json!({"blueprint_name": "Ok", "parent_class": "Interface"}), "not instantiable"),
        (
            json!({"blueprint_name": "Ok", "parent_class": "Actor", "asset_path": "/Game/../Secrets/"}),
            "invalid asset path",
        ),
        (
            json!({"blueprint_name": "Ok", "parent_class": "Actor", "asset_path": "/Engine/Blueprints/"}),
            "invalid asset path",
        ),
        (
            json!({"blueprint_name": "Ok", "parent_class": "Actor", "asset_path": "/Game/What?/"}),
            "invalid asset path",
        ),
    ];
    for (params, expected) in cases {
        let result = fx.call("create_blueprint", params.clone());
        assert_eq!(result["success"], json!(false), "{params}");
        let error = result["error"].as_str().unwrap();
        assert!(error.contains(expected), "{params}: {error}");
    }
    assert!(fx.host.assets.is_empty());
}

#[test]
fn integer_property_accepts_numbers_only() {
    let mut fx = Fixture::new();
    fx.create("Hero", "Character");
    let path = "/Game/Blueprints/Hero";

    let ok = fx.call(
        "set_blueprint_property",
        json!({"blueprint_path": path, "property_name": "Health", "property_value": "100", "property_type": "int"}),
    );
    assert_eq!(ok["success"], json!(true));
    assert_eq!(fx.defaults(path, "Health"), PropertyValue::Int(100));

    let bad = fx.call(
        "set_blueprint_property",
        json!({"blueprint_path": path, "property_name": "Health", "property_value": "abc", "property_type": "int"}),
    );
    assert_eq!(bad["success"], json!(false));
    assert!(bad["error"].as_str().unwrap().contains("cannot convert"));
    assert_eq!(fx.defaults(path, "Health"), PropertyValue::Int(100));
}

#[test]
fn vector_property_needs_three_components() {
    let mut fx = Fixture::new();
    fx.create("Spawner", "Actor");
    let path = "/Game/Blueprints/Spawner";

    let ok = fx.call(
        "set_property",
        json!({"blueprint_path": path, "property_name": "SpawnLocation", "property_value": "100.0,200.0,300.0", "property_type": "Vector"}),
    );
    assert_eq!(ok["success"], json!(true));
    assert_eq!(
        fx.defaults(path, "SpawnLocation"),
        PropertyValue::Vector(Vector3 {
            x: 100.0,
            y: 200.0,
            z: 300.0
        })
    );

    let bad = fx.call(
        "set_property",
        json!({"blueprint_path": path, "property_name": "SpawnLocation", "property_value": "100.0,200.0", "property_type": "Vector"}),
    );
    assert_eq!(bad["success"], json!(false));
    assert_eq!(
        fx.defaults(path, "SpawnLocation"),
        PropertyValue::Vector(Vector3 {
            x: 100.0,
            y: 200.0,
            z: 300.0
        })
    );
}

#[test]
fn property_errors_are_reported_not_thrown() {
    let mut fx = Fixture::new();
    fx.create("Hero", "Character");
    let path = "/Game/Blueprints/Hero";

    let unknown = fx.call(
        "set_property",
        json!({"blueprint_path": path, "property_name": "Mana", "property_value": "5"}),
    );
    assert!(unknown["error"].as_str().unwrap().contains("not found"));

    let opaque = fx.call(
        "set_property",
        json!({"blueprint_path": path, "property_name": "Owner", "property_value": "/Game/Other"}),
    );
    assert!(opaque["error"].as_str().unwrap().contains("unsupported type"));

    let missing_asset = fx.call(
        "set_property",
        json!({"blueprint_path": "/Game/Blueprints/Nobody", "property_name": "Health", "property_value": "5"}),
    );
    assert!(missing_asset["error"].as_str().unwrap().contains("not found"));

    let missing_value = fx.call(
        "set_property",
        json!({"blueprint_path": path, "property_name": "Health"}),
    );
    assert_eq!(
        missing_value,
        json!({"success": false, "error": "missing or invalid parameter: property_value"})
    );
}

#[test]
fn components_and_compile() {
    let mut fx = Fixture::new();
    fx.create("Door", "Actor");
    let path = "/Game/Blueprints/Door";

    let added = fx.call(
        "add_component",
        json!({"blueprint_path": path, "component_type": "StaticMesh", "component_name": "Frame"}),
    );
    assert_eq!(added["success"], json!(true));
    assert_eq!(added["blueprint_path"], json!(path));

    let not_component = fx.call(
        "add_component",
        json!({"blueprint_path": path, "component_type": "Pawn", "component_name": "Rider"}),
    );
    assert!(not_component["error"].as_str().unwrap().contains("not a component"));

    let compiled = fx.call("compile_blueprint", json!({"blueprint_path": path}));
    assert_eq!(compiled["success"], json!(true));
    assert_eq!(fx.host.assets.get(path).unwrap().status, CompileStatus::UpToDate);
}

#[test]
fn protected_assets_are_read_only() {
    let mut fx = Fixture::new();
    let created = fx.call(
        "create_blueprint",
        json!({"blueprint_name": "GameRules", "parent_class": "Actor", "asset_path": "/Game/Core/"}),
    );
    let path = created["blueprint_path"].as_str().unwrap().to_string();

    for (method, params) in [
        (
            "set_blueprint_property",
            json!({"blueprint_path": path, "property_name": "bHidden", "property_value": "true"}),
        ),
        (
            "add_component",
            json!({"blueprint_path": path, "component_type": "SceneComponent", "component_name": "Root"}),
        ),
        ("compile_blueprint", json!({"blueprint_path": path})),
    ] {
        let result = fx.call(method, params);
        assert_eq!(result["success"], json!(false), "{method}");
        assert!(result["error"].as_str().unwrap().contains("protected"), "{method}");
    }
    assert_eq!(fx.defaults(&path, "bHidden"), PropertyValue::Bool(false));
}
