//! Shared model of the context middleware: the message tree and its wire
//! codec, lease values, component descriptions and the query engine.

pub mod codec;
pub mod element;
pub mod lease;
pub mod messages;
pub mod query;
pub mod tree;

pub use codec::{decode, decode_from, encode, encode_document, DecodeError, EncodeError};
pub use element::{Comparison, ComponentDescription, DescriptionElement, ElementKind};
pub use lease::{ComponentIndex, Lease, LeaseStatus, RegistryOwner};
pub use messages::{
    Deregistration, Heartbeat, MessageError, QueryMatch, QueryReply, QueryRequest, Registration,
    RegistrationReply, WireMessage,
};
pub use query::{DataModel, IndexTable, MatchArray, Query, QueryItem};
pub use tree::{Attributes, TreeBuilder, TreeError, TreeNode, Value};
