/// Object schemas: the typed shapes peers advertise at handshake.
///
/// A schema is an immutable description of a syncable object type. Two
/// peers interoperate on a type when both declare a schema for the same
/// type name; field compatibility is deliberately not enforced.
use serde::{Deserialize, Serialize};

/// The closed set of field value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    String,
    Int32,
    Int64,
    Float64,
    Bool,
    Bytes,
}

/// One field of an object schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// A named, versioned, typed shape for syncable objects.
///
/// `schema_version` is a free-form tag, opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSchema {
    pub type_name: String,
    pub schema_version: String,
    pub fields: Vec<FieldDescriptor>,
    pub permissions: Vec<String>,
}

impl ObjectSchema {
    pub fn new(type_name: impl Into<String>, schema_version: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            schema_version: schema_version.into(),
            fields: Vec::new(),
            permissions: Vec::new(),
        }
    }

    /// Append a field descriptor (builder style).
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor::new(name, kind));
        self
    }

    /// Append a nullable field descriptor.
    pub fn nullable_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDescriptor::new(name, kind).nullable());
        self
    }

    /// Append a permission token.
    pub fn permission(mut self, token: impl Into<String>) -> Self {
        self.permissions.push(token.into());
        self
    }

    /// Look up a field descriptor by name.
    pub fn field_descriptor(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}
