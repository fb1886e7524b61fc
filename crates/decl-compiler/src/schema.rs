/// Language-agnostic schema trees
///
/// Translated parameter, result and argument types end up as [`SchemaNode`]
/// trees. They are finite by construction: recursive shape references are
/// cut off with [`SchemaNode::Unsupported`].

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value as Json, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    String,
    Number,
    Integer,
    Boolean,
    Null,
    Any,
}

impl PrimitiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveKind::String => "string",
            PrimitiveKind::Number => "number",
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Null => "null",
            PrimitiveKind::Any => "any",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, PrimitiveKind::Number | PrimitiveKind::Integer)
    }
}

/// Validation constraints attached to a leaf or list
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        *self == Constraints::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "camelCase")]
pub enum SchemaNode {
    Leaf {
        kind: PrimitiveKind,
        #[serde(skip_serializing_if = "Constraints::is_empty")]
        constraints: Constraints,
    },
    /// String literal set, in declaration order
    Enum { values: Vec<String> },
    List {
        items: Box<SchemaNode>,
        #[serde(skip_serializing_if = "Constraints::is_empty")]
        constraints: Constraints,
    },
    Object { fields: IndexMap<String, ObjectField> },
    Unsupported { reason: String },
}

impl SchemaNode {
    pub fn leaf(kind: PrimitiveKind) -> Self {
        SchemaNode::Leaf {
            kind,
            constraints: Constraints::default(),
        }
    }

    pub fn empty_object() -> Self {
        SchemaNode::Object {
            fields: IndexMap::new(),
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        SchemaNode::Unsupported {
            reason: reason.into(),
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, SchemaNode::Object { .. })
    }

    pub fn fields(&self) -> Option<&IndexMap<String, ObjectField>> {
        match self {
            SchemaNode::Object { fields } => Some(fields),
            _ => None,
        }
    }

    /// Short name of the node kind, used in diagnostics
    pub fn describe(&self) -> &'static str {
        match self {
            SchemaNode::Leaf { kind, .. } => kind.as_str(),
            SchemaNode::Enum { .. } => "enum",
            SchemaNode::List { .. } => "list",
            SchemaNode::Object { .. } => "object",
            SchemaNode::Unsupported { .. } => "unsupported",
        }
    }
}

/// One named field of an object node
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectField {
    pub schema: SchemaNode,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Json>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
}

impl ObjectField {
    pub fn new(schema: SchemaNode, required: bool) -> Self {
        Self {
            schema,
            required,
            description: None,
            default: None,
            deprecated: false,
        }
    }
}

/// Render a schema node as a JSON Schema document fragment.
///
/// `any` leaves and unsupported nodes become the empty schema, which
/// accepts every value.
pub fn json_schema(node: &SchemaNode) -> Json {
    match node {
        SchemaNode::Leaf { kind, constraints } => {
            let mut out = Map::new();
            if *kind != PrimitiveKind::Any {
                out.insert("type".into(), json!(kind.as_str()));
            }
            write_constraints(&mut out, constraints, *kind == PrimitiveKind::String);
            Json::Object(out)
        }
        SchemaNode::Enum { values } => json!({ "type": "string", "enum": values }),
        SchemaNode::List { items, constraints } => {
            let mut out = Map::new();
            out.insert("type".into(), json!("array"));
            out.insert("items".into(), json_schema(items));
            write_constraints(&mut out, constraints, false);
            Json::Object(out)
        }
        SchemaNode::Object { fields } => {
            let mut properties = Map::new();
            let mut required = Vec::new();
            for (name, field) in fields {
                let mut property = json_schema(&field.schema);
                if let Json::Object(map) = &mut property {
                    if let Some(description) = &field.description {
                        map.insert("description".into(), json!(description));
                    }
                    if let Some(default) = &field.default {
                        map.insert("default".into(), default.clone());
                    }
                    if field.deprecated {
                        map.insert("deprecated".into(), json!(true));
                    }
                }
                if field.required {
                    required.push(json!(name));
                }
                properties.insert(name.clone(), property);
            }
            let mut out = Map::new();
            out.insert("type".into(), json!("object"));
            out.insert("properties".into(), Json::Object(properties));
            if !required.is_empty() {
                out.insert("required".into(), Json::Array(required));
            }
            Json::Object(out)
        }
        SchemaNode::Unsupported { .. } => json!({}),
    }
}

fn write_constraints(out: &mut Map<String, Json>, constraints: &Constraints, string: bool) {
    if let Some(min) = constraints.minimum {
        out.insert("minimum".into(), json!(min));
    }
    if let Some(max) = constraints.maximum {
        out.insert("maximum".into(), json!(max));
    }
    let (min_key, max_key) = if string {
        ("minLength", "maxLength")
    } else {
        ("minItems", "maxItems")
    };
    if let Some(min) = constraints.min_length {
        out.insert(min_key.into(), json!(min));
    }
    if let Some(max) = constraints.max_length {
        out.insert(max_key.into(), json!(max));
    }
    if let Some(pattern) = &constraints.pattern {
        out.insert("pattern".into(), json!(pattern));
    }
    if let Some(format) = &constraints.format {
        out.insert("format".into(), json!(format));
    }
}
