//! Typed wire messages exchanged between components and the discoverer.
//!
//! Each message converts to and from a [`TreeNode`]; [`WireMessage`] adds the
//! codec step on top.

use std::str::FromStr;

use crate::codec::{self, DecodeError, EncodeError};
use crate::element::ComponentDescription;
use crate::lease::{ComponentIndex, Lease};
use crate::query::Query;
use crate::tree::TreeNode;

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("expected <{expected}> message, found <{found}>")]
    UnexpectedRoot { expected: &'static str, found: String },
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid {field}: {value:?}")]
    Invalid { field: &'static str, value: String },
    #[error("unrecognized query expression <{0}>")]
    Query(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

pub trait WireMessage: Sized {
    const ROOT: &'static str;

    fn to_tree(&self) -> TreeNode;

    fn from_tree(node: &TreeNode) -> Result<Self, MessageError>;

    fn to_wire(&self) -> Result<String, MessageError> {
        Ok(codec::encode_document(&self.to_tree())?)
    }

    fn from_wire(input: &str) -> Result<Self, MessageError> {
        let tree = codec::decode(input)?;
        Self::from_tree(&tree)
    }
}

fn expect_root(node: &TreeNode, expected: &'static str) -> Result<(), MessageError> {
    if node.name() == expected {
        Ok(())
    } else {
        Err(MessageError::UnexpectedRoot {
            expected,
            found: node.name().to_string(),
        })
    }
}

pub(crate) fn parse_attribute<T: FromStr>(
    node: &TreeNode,
    key: &'static str,
) -> Result<T, MessageError> {
    let raw = node.attribute(key).ok_or(MessageError::Missing(key))?;
    raw.trim().parse().map_err(|_| MessageError::Invalid {
        field: key,
        value: raw.to_string(),
    })
}

fn optional_attribute<T: FromStr>(
    node: &TreeNode,
    key: &'static str,
) -> Result<Option<T>, MessageError> {
    match node.attribute(key) {
        Some(_) => parse_attribute(node, key).map(Some),
        None => Ok(None),
    }
}

fn child_text(node: &TreeNode, name: &'static str) -> Option<String> {
    node.child_by_name(name)
        .and_then(|child| child.values().first())
        .and_then(|value| value.as_text())
        .map(str::to_string)
}

fn list(name: &str, item: &str, values: &[String]) -> TreeNode {
    values.iter().fold(TreeNode::new(name), |node, value| {
        node.child(TreeNode::with_text(item, value.clone()))
    })
}

fn read_list(node: &TreeNode, name: &str, item: &str) -> Vec<String> {
    node.child_by_name(name)
        .map(|list| {
            list.children()
                .filter(|child| child.name() == item)
                .filter_map(|child| child.values().first().and_then(|v| v.as_text()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// A component announcing itself to the discoverer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub component_type: String,
    pub attributes: Vec<String>,
    pub callbacks: Vec<String>,
    pub services: Vec<String>,
    pub lease_slots: Option<u32>,
}

impl Registration {
    pub fn new(id: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            hostname: hostname.into(),
            port,
            component_type: String::new(),
            attributes: Vec::new(),
            callbacks: Vec::new(),
            services: Vec::new(),
            lease_slots: None,
        }
    }

    pub fn into_description(self, index: ComponentIndex) -> ComponentDescription {
        ComponentDescription {
            index,
            id: self.id,
            hostname: self.hostname,
            port: self.port,
            component_type: self.component_type,
            attributes: self.attributes,
            callbacks: self.callbacks,
            services: self.services,
        }
    }
}

impl WireMessage for Registration {
    const ROOT: &'static str = "registration";

    fn to_tree(&self) -> TreeNode {
        let mut node = TreeNode::new(Self::ROOT)
            .child(TreeNode::with_text("id", self.id.clone()))
            .child(TreeNode::with_text("hostname", self.hostname.clone()))
            .child(TreeNode::with_text("port", self.port.to_string()));
        if !self.component_type.is_empty() {
            node.push(TreeNode::with_text("type", self.component_type.clone()));
        }
        node.push(list("attributes", "attribute", &self.attributes));
        node.push(list("callbacks", "callback", &self.callbacks));
        node.push(list("services", "service", &self.services));
        if let Some(slots) = self.lease_slots {
            node.set_attribute("leaseSlots", slots.to_string());
        }
        node
    }

    fn from_tree(node: &TreeNode) -> Result<Self, MessageError> {
        expect_root(node, Self::ROOT)?;
        let id = child_text(node, "id").ok_or(MessageError::Missing("id"))?;
        let raw_port = child_text(node, "port").ok_or(MessageError::Missing("port"))?;
        let port = raw_port.parse().map_err(|_| MessageError::Invalid {
            field: "port",
            value: raw_port.clone(),
        })?;
        Ok(Self {
            id,
            hostname: child_text(node, "hostname").unwrap_or_default(),
            port,
            component_type: child_text(node, "type").unwrap_or_default(),
            attributes: read_list(node, "attributes", "attribute"),
            callbacks: read_list(node, "callbacks", "callback"),
            services: read_list(node, "services", "service"),
            lease_slots: optional_attribute(node, "leaseSlots")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationReply {
    pub lease: Lease,
}

impl WireMessage for RegistrationReply {
    const ROOT: &'static str = "registrationReply";

    fn to_tree(&self) -> TreeNode {
        TreeNode::new(Self::ROOT)
            .attr("componentIndex", self.lease.component_index.to_string())
            .child(self.lease.to_tree())
    }

    fn from_tree(node: &TreeNode) -> Result<Self, MessageError> {
        expect_root(node, Self::ROOT)?;
        let lease_node = node.child_by_name("lease").ok_or(MessageError::Missing("lease"))?;
        Ok(Self {
            lease: Lease::from_tree(lease_node)?,
        })
    }
}

/// Lease renewal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub component_index: ComponentIndex,
    pub lease_slots: Option<u32>,
}

impl WireMessage for Heartbeat {
    const ROOT: &'static str = "heartbeat";

    fn to_tree(&self) -> TreeNode {
        let mut node =
            TreeNode::new(Self::ROOT).attr("componentIndex", self.component_index.to_string());
        if let Some(slots) = self.lease_slots {
            node.set_attribute("leaseSlots", slots.to_string());
        }
        node
    }

    fn from_tree(node: &TreeNode) -> Result<Self, MessageError> {
        expect_root(node, Self::ROOT)?;
        Ok(Self {
            component_index: parse_attribute(node, "componentIndex")?,
            lease_slots: optional_attribute(node, "leaseSlots")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deregistration {
    pub component_index: ComponentIndex,
}

impl WireMessage for Deregistration {
    const ROOT: &'static str = "deregistration";

    fn to_tree(&self) -> TreeNode {
        TreeNode::new(Self::ROOT).attr("componentIndex", self.component_index.to_string())
    }

    fn from_tree(node: &TreeNode) -> Result<Self, MessageError> {
        expect_root(node, Self::ROOT)?;
        Ok(Self {
            component_index: parse_attribute(node, "componentIndex")?,
        })
    }
}

/// A search request wrapping one query expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub query: Query,
}

impl WireMessage for QueryRequest {
    const ROOT: &'static str = "query";

    fn to_tree(&self) -> TreeNode {
        TreeNode::new(Self::ROOT).child(self.query.to_tree())
    }

    fn from_tree(node: &TreeNode) -> Result<Self, MessageError> {
        expect_root(node, Self::ROOT)?;
        let expression = node
            .children()
            .next()
            .ok_or(MessageError::Missing("query expression"))?;
        let query = Query::from_tree(expression)
            .ok_or_else(|| MessageError::Query(expression.name().to_string()))?;
        Ok(Self { query })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMatch {
    pub component_index: ComponentIndex,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryReply {
    pub matches: Vec<QueryMatch>,
}

impl WireMessage for QueryReply {
    const ROOT: &'static str = "queryReply";

    fn to_tree(&self) -> TreeNode {
        self.matches.iter().fold(TreeNode::new(Self::ROOT), |node, m| {
            node.child(
                TreeNode::with_text("component", m.id.clone())
                    .attr("index", m.component_index.to_string()),
            )
        })
    }

    fn from_tree(node: &TreeNode) -> Result<Self, MessageError> {
        expect_root(node, Self::ROOT)?;
        let matches = node
            .children()
            .filter(|child| child.name() == "component")
            .map(|child| {
                Ok(QueryMatch {
                    component_index: parse_attribute(child, "index")?,
                    id: child
                        .values()
                        .first()
                        .and_then(|v| v.as_text())
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect::<Result<_, MessageError>>()?;
        Ok(Self { matches })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Comparison, ElementKind};

    fn registration() -> Registration {
        let mut registration = Registration::new("w1", "sensor-host", 2000);
        registration.component_type = "widget".into();
        registration.attributes = vec!["temperature".into(), "humidity".into()];
        registration.services = vec!["display".into()];
        registration.lease_slots = Some(2);
        registration
    }

    #[test]
    fn test_registration_over_the_wire() {
        let wire = registration().to_wire().unwrap();
        assert!(wire.starts_with(codec::HEADER));
        assert!(wire.contains("<registration leaseSlots=\"2\">"));
        assert_eq!(Registration::from_wire(&wire).unwrap(), registration());
    }

    #[test]
    fn test_registration_requires_id_and_numeric_port() {
        let missing_id = TreeNode::new("registration").child(TreeNode::with_text("port", "1"));
        assert!(matches!(Registration::from_tree(&missing_id), Err(MessageError::Missing("id"))));

        let bad_port = TreeNode::new("registration")
            .child(TreeNode::with_text("id", "w1"))
            .child(TreeNode::with_text("port", "http"));
        assert!(matches!(
            Registration::from_tree(&bad_port),
            Err(MessageError::Invalid { field: "port", .. })
        ));
    }

    #[test]
    fn test_wrong_root_is_rejected() {
        let wire = Deregistration {
            component_index: ComponentIndex(3),
        }
        .to_wire()
        .unwrap();
        assert!(matches!(
            Heartbeat::from_wire(&wire),
            Err(MessageError::UnexpectedRoot { expected: "heartbeat", .. })
        ));
        assert!(matches!(Heartbeat::from_wire("<heartbeat"), Err(MessageError::Decode(_))));
    }

    #[test]
    fn test_heartbeat_and_deregistration() {
        let heartbeat = Heartbeat {
            component_index: ComponentIndex(7),
            lease_slots: None,
        };
        let parsed = Heartbeat::from_wire(&heartbeat.to_wire().unwrap()).unwrap();
        assert_eq!(parsed, heartbeat);

        let deregistration = Deregistration {
            component_index: ComponentIndex(7),
        };
        assert_eq!(
            Deregistration::from_wire("<deregistration componentIndex=\"7\"/>").unwrap(),
            deregistration
        );
    }

    #[test]
    fn test_query_request_reports_unknown_expression() {
        let request = QueryRequest {
            query: Query::and(
                Query::item(ElementKind::Id, "w1", Comparison::Equal),
                Query::item(ElementKind::Port, "1520", Comparison::GreaterEqual),
            ),
        };
        assert_eq!(QueryRequest::from_wire(&request.to_wire().unwrap()).unwrap(), request);

        assert!(matches!(
            QueryRequest::from_wire("<query><xor/></query>"),
            Err(MessageError::Query(name)) if name == "xor"
        ));
        assert!(matches!(QueryRequest::from_wire("<query/>"), Err(MessageError::Missing(_))));
    }

    #[test]
    fn test_query_reply_lists_matches() {
        let reply = QueryReply {
            matches: vec![
                QueryMatch {
                    component_index: ComponentIndex(7),
                    id: "w1".into(),
                },
                QueryMatch {
                    component_index: ComponentIndex(9),
                    id: "w2".into(),
                },
            ],
        };
        let wire = reply.to_wire().unwrap();
        assert!(wire.contains("<component index=\"7\">w1</component>"));
        assert_eq!(QueryReply::from_wire(&wire).unwrap(), reply);
        assert_eq!(QueryReply::from_wire("<queryReply/>").unwrap(), QueryReply::default());
    }

    #[test]
    fn test_registration_reply_carries_lease() {
        let reply = RegistrationReply {
            lease: Lease::new(ComponentIndex(4), 3),
        };
        let parsed = RegistrationReply::from_wire(&reply.to_wire().unwrap()).unwrap();
        assert_eq!(parsed, reply);
    }
}
