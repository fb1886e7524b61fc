/// Descriptor graph produced by the pipeline
///
/// Built fresh on every run and never mutated once returned. Descriptor
/// lists keep source declaration order.

use crate::schema::SchemaNode;
use serde::Serialize;
use serde_json::Value as Json;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorGraph {
    pub service: Option<ServiceDescriptor>,
    pub operations: Vec<OperationDescriptor>,
    pub prompts: Vec<PromptDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
    pub groups: Vec<CapabilityGroupDescriptor>,
}

impl DescriptorGraph {
    pub fn operation(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.iter().find(|op| op.name == name)
    }

    pub fn prompt(&self, name: &str) -> Option<&PromptDescriptor> {
        self.prompts.iter().find(|p| p.name == name)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|r| r.name == name)
    }

    pub fn group(&self, name: &str) -> Option<&CapabilityGroupDescriptor> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Groups that list the given operation
    pub fn groups_of<'a>(&'a self, operation: &'a str) -> impl Iterator<Item = &'a CapabilityGroupDescriptor> {
        self.groups
            .iter()
            .filter(move |g| g.operations.iter().any(|name| name == operation))
    }

    pub fn is_empty(&self) -> bool {
        self.service.is_none()
            && self.operations.is_empty()
            && self.prompts.is_empty()
            && self.resources.is_empty()
            && self.groups.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthConfig {
    /// Static key passed in a request header
    #[serde(rename_all = "camelCase")]
    ApiKey {
        header: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        env: Option<String>,
    },
    /// Delegated bearer tokens issued by an external authority
    #[serde(rename = "oauth", rename_all = "camelCase")]
    OAuth {
        issuer: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        audience: Option<String>,
        scopes: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Always an object node, empty when no params are declared
    pub params: SchemaNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SchemaNode>,
    pub flags: OperationFlags,
    pub handler: Option<HandlerRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationFlags {
    pub read_only: bool,
    pub destructive: bool,
    pub idempotent: bool,
    pub open_world: bool,
    pub requires_confirmation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub arguments: Vec<PromptArgument>,
    pub content: PromptContent,
    pub handler: Option<HandlerRef>,
}

impl PromptDescriptor {
    pub fn is_dynamic(&self) -> bool {
        matches!(self.content, PromptContent::Dynamic)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptArgument {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    pub schema: SchemaNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Json>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "camelCase")]
pub enum PromptContent {
    /// Static text with `{{name}}` placeholders
    Template(String),
    /// Rendered by a bound handler
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub subscribable: bool,
    pub content: ResourceContent,
    pub handler: Option<HandlerRef>,
}

impl ResourceDescriptor {
    pub fn is_dynamic(&self) -> bool {
        matches!(self.content, ResourceContent::Dynamic)
    }

    /// A uri with `{var}` segments addresses a family of resources
    pub fn is_template(&self) -> bool {
        is_uri_template(&self.uri)
    }
}

pub(crate) fn is_uri_template(uri: &str) -> bool {
    match (uri.find('{'), uri.rfind('}')) {
        (Some(open), Some(close)) => open < close,
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ResourceContent {
    /// Inline JSON built from literal types
    Static(Json),
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityGroupDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Member operation names in declaration order
    pub operations: Vec<String>,
}

/// The implementation a descriptor was bound to.
///
/// `symbol` is the top-level identifier (`add`), or `default.<member>` for
/// members of the default export aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct HandlerRef {
    pub symbol: String,
}

impl HandlerRef {
    pub fn top_level(name: &str) -> Self {
        Self {
            symbol: name.to_string(),
        }
    }

    pub fn default_member(name: &str) -> Self {
        Self {
            symbol: format!("default.{}", name),
        }
    }

    /// Member name when the handler lives on the default export
    pub fn default_member_name(&self) -> Option<&str> {
        self.symbol.strip_prefix("default.")
    }
}
