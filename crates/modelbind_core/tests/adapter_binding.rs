use modelbind_core::{
    AdapterError, AdapterResult, Document, DocumentId, DocumentRepository, FieldType,
    ModelDefinition, ModelRegistry, RegistryError, Schema, SchemaError, SchemaResult,
    TypedModelAdapter,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: DocumentId,
    name: String,
    age: u32,
}

impl Document for User {
    fn id(&self) -> DocumentId {
        self.id
    }
}

struct UserSchema;

impl ModelDefinition for UserSchema {
    type Doc = User;

    fn define_schema(&self) -> SchemaResult<Schema> {
        Schema::builder()
            .required("name", FieldType::String)
            .required("age", FieldType::Number)
            .build()
    }
}

struct UserSchemaWithEmail;

impl ModelDefinition for UserSchemaWithEmail {
    type Doc = User;

    fn define_schema(&self) -> SchemaResult<Schema> {
        Schema::builder()
            .required("name", FieldType::String)
            .required("age", FieldType::Number)
            .field("email", FieldType::String)
            .build()
    }
}

struct FailingSchema;

impl ModelDefinition for FailingSchema {
    type Doc = User;

    fn define_schema(&self) -> SchemaResult<Schema> {
        Err(SchemaError::InvalidDefinition("schema source unavailable".to_string()))
    }
}

/// Application-side adapter the way a service layer would declare one.
struct UserModelAdapter {
    inner: TypedModelAdapter<User>,
}

impl UserModelAdapter {
    const MODEL_NAME: &'static str = "User";

    fn new(registry: &ModelRegistry) -> AdapterResult<Self> {
        Ok(Self {
            inner: TypedModelAdapter::new(registry, Self::MODEL_NAME, &UserSchema)?,
        })
    }
}

fn user(name: &str, age: u32) -> User {
    User {
        id: Uuid::new_v4(),
        name: name.to_string(),
        age,
    }
}

#[test]
fn constructing_binds_handle_for_model_name() {
    let registry = ModelRegistry::open_in_memory().unwrap();
    let adapter = UserModelAdapter::new(&registry).unwrap();

    assert_eq!(adapter.inner.model().name(), "User");
    assert_eq!(adapter.inner.model_name(), "User");
    assert!(registry.contains("User"));
}

#[test]
fn user_model_adapter_instances_share_one_underlying_model() {
    let registry = ModelRegistry::open_in_memory().unwrap();
    let first = UserModelAdapter::new(&registry).unwrap();
    let second = UserModelAdapter::new(&registry).unwrap();

    assert!(first.inner.model().same_model(second.inner.model()));
    assert_eq!(registry.len(), 1);

    let ada = user("Ada", 36);
    first.inner.model().insert(&ada).unwrap();
    let loaded = second.inner.model().find_by_id(ada.id).unwrap();
    assert_eq!(loaded, Some(ada));
}

#[test]
fn differing_schema_under_same_name_is_rejected_without_overwrite() {
    let registry = ModelRegistry::open_in_memory().unwrap();
    let original = UserModelAdapter::new(&registry).unwrap();

    let err = TypedModelAdapter::new(&registry, "User", &UserSchemaWithEmail)
        .expect_err("conflicting schema must fail");
    match err {
        AdapterError::Registry(RegistryError::SchemaConflict {
            model,
            registered_fingerprint,
            requested_fingerprint,
        }) => {
            assert_eq!(model, "User");
            assert_eq!(registered_fingerprint, original.inner.model().fingerprint());
            assert_ne!(registered_fingerprint, requested_fingerprint);
        }
        other => panic!("unexpected error: {other}"),
    }

    let again = UserModelAdapter::new(&registry).unwrap();
    assert!(again.inner.model().same_model(original.inner.model()));
    assert!(again.inner.model().schema().field("email").is_none());
}

#[test]
fn bound_handle_stays_the_same_for_adapter_lifetime() {
    let registry = ModelRegistry::open_in_memory().unwrap();
    let adapter = UserModelAdapter::new(&registry).unwrap();

    let before = adapter.inner.model().clone();
    UserModelAdapter::new(&registry).unwrap();
    let _ = TypedModelAdapter::new(&registry, "User", &UserSchemaWithEmail);

    assert!(adapter.inner.model().same_model(&before));
    assert_eq!(adapter.inner.model().fingerprint(), before.fingerprint());
}

#[test]
fn failing_schema_factory_fails_construction_and_registers_nothing() {
    let registry = ModelRegistry::open_in_memory().unwrap();
    let err = TypedModelAdapter::new(&registry, "User", &FailingSchema)
        .expect_err("schema factory error must propagate");

    assert!(matches!(
        err,
        AdapterError::Schema(SchemaError::InvalidDefinition(_))
    ));
    assert!(registry.is_empty());
    assert!(registry.registered_models().unwrap().is_empty());
}

#[test]
fn empty_model_name_is_rejected_by_registry() {
    let registry = ModelRegistry::open_in_memory().unwrap();
    let err = TypedModelAdapter::new(&registry, "", &UserSchema)
        .expect_err("empty name must fail");
    assert!(matches!(
        err,
        AdapterError::Registry(RegistryError::InvalidModelName(_))
    ));
}

#[test]
fn construction_after_disconnect_fails_fast() {
    let registry = ModelRegistry::open_in_memory().unwrap();
    registry.disconnect().unwrap();

    let err = UserModelAdapter::new(&registry)
        .err()
        .expect("construction on a closed registry must fail");
    assert!(matches!(
        err,
        AdapterError::Registry(RegistryError::Disconnected)
    ));
}

#[test]
fn adapters_on_separate_registries_are_isolated() {
    let left = ModelRegistry::open_in_memory().unwrap();
    let right = ModelRegistry::open_in_memory().unwrap();

    let left_users = UserModelAdapter::new(&left).unwrap();
    let right_users = UserModelAdapter::new(&right).unwrap();
    assert!(!left_users.inner.model().same_model(right_users.inner.model()));

    left_users.inner.model().insert(&user("Ada", 36)).unwrap();
    assert_eq!(right_users.inner.model().count().unwrap(), 0);
}
