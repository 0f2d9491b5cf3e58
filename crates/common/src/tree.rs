//! Hierarchical message model.
//!
//! Every message exchanged between components is a [`TreeNode`]: a name, an
//! attribute map and an ordered sequence of [`Value`]s, each either text or a
//! nested node. Trees are assembled with a [`TreeBuilder`], which the decoder
//! drives with balanced `open`/`add_text`/`close` calls.

use std::collections::BTreeMap;
use std::fmt;

/// Attribute map of a node. Keys are unique.
pub type Attributes = BTreeMap<String, String>;

/// One entry of a node's value sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Node(TreeNode),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text.as_str()),
            Value::Node(_) => None,
        }
    }

    pub fn as_node(&self) -> Option<&TreeNode> {
        match self {
            Value::Text(_) => None,
            Value::Node(node) => Some(node),
        }
    }
}

impl From<TreeNode> for Value {
    fn from(node: TreeNode) -> Self {
        Value::Node(node)
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

/// One element of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeNode {
    name: String,
    attributes: Attributes,
    values: Vec<Value>,
}

impl TreeNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Attributes::new(),
            values: Vec::new(),
        }
    }

    /// Node holding a single text value, e.g. `<port>2000</port>`.
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name).text(text)
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Appends text, merging it into a directly preceding text value.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        append_value(&mut self.values, Value::Text(text.into()));
        self
    }

    pub fn child(mut self, child: TreeNode) -> Self {
        self.values.push(Value::Node(child));
        self
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        append_value(&mut self.values, value.into());
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of direct values that are nodes.
    pub fn count_children(&self) -> usize {
        self.children().count()
    }

    /// Direct child nodes in order, text values excluded.
    pub fn children(&self) -> impl Iterator<Item = &TreeNode> {
        self.values.iter().filter_map(Value::as_node)
    }

    /// First direct child named `name`.
    pub fn child_by_name(&self, name: &str) -> Option<&TreeNode> {
        self.children().find(|child| child.name == name)
    }

    /// The `n`-th (1-indexed) direct child named `name`.
    ///
    /// Only direct children are considered; this is not equivalent to
    /// [`TreeNode::find_first`] on nested structures.
    pub fn nth_child_by_name(&self, name: &str, n: usize) -> Option<&TreeNode> {
        if n == 0 {
            return None;
        }
        self.children().filter(|child| child.name == name).nth(n - 1)
    }

    /// Depth-first search starting with this node itself.
    pub fn find_first(&self, name: &str) -> Option<&TreeNode> {
        if name.is_empty() {
            return None;
        }
        if self.name == name {
            return Some(self);
        }
        self.children().find_map(|child| child.find_first(name))
    }

    /// Whether any node below this one carries `name`.
    ///
    /// Direct children are checked before descending into their subtrees.
    pub fn exists_descendant(&self, name: &str) -> bool {
        self.children().any(|child| child.name == name)
            || self.children().any(|child| child.exists_descendant(name))
    }

    /// First value of the first node named `name` (see [`TreeNode::find_first`]).
    pub fn first_value_of(&self, name: &str) -> Option<&Value> {
        self.find_first(name)?.values.first()
    }

    /// Text form of [`TreeNode::first_value_of`].
    pub fn text_of(&self, name: &str) -> Option<&str> {
        self.first_value_of(name)?.as_text()
    }
}

impl fmt::Display for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.name)?;
        if !self.attributes.is_empty() {
            write!(f, " {{")?;
            for (i, (key, value)) in self.attributes.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}={:?}", key, value)?;
            }
            write!(f, "}}")?;
        }
        for value in &self.values {
            match value {
                Value::Text(text) => write!(f, " {:?}", text)?,
                Value::Node(node) => write!(f, " {}", node)?,
            }
        }
        write!(f, "]")
    }
}

/// Two text values never sit next to each other: on the wire they would be
/// read back as one. Adjacent texts are merged and empty texts dropped.
fn append_value(values: &mut Vec<Value>, value: Value) {
    if let Value::Text(text) = &value {
        if text.is_empty() {
            return;
        }
        if let Some(Value::Text(last)) = values.last_mut() {
            last.push_str(text);
            return;
        }
    }
    values.push(value);
}

/// Misuse of the [`TreeBuilder`] protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("no element is open")]
    NothingOpen,
    #[error("document root is already closed, cannot add <{0}>")]
    RootClosed(String),
    #[error("{0} element(s) still open")]
    Unclosed(usize),
    #[error("no element was built")]
    Empty,
}

/// Stack-based tree assembler.
///
/// `open` pushes a new element, `close` pops it and appends it to the element
/// below, `add_text` appends to the element on top.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    stack: Vec<TreeNode>,
    root: Option<TreeNode>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(
        &mut self,
        name: impl Into<String>,
        attributes: Attributes,
    ) -> Result<(), TreeError> {
        let name = name.into();
        if self.root.is_some() {
            return Err(TreeError::RootClosed(name));
        }
        self.stack.push(TreeNode {
            name,
            attributes,
            values: Vec::new(),
        });
        Ok(())
    }

    pub fn add_text(&mut self, text: impl Into<String>) -> Result<(), TreeError> {
        let top = self.stack.last_mut().ok_or(TreeError::NothingOpen)?;
        append_value(&mut top.values, Value::Text(text.into()));
        Ok(())
    }

    /// Closes the element on top and returns its name.
    pub fn close(&mut self) -> Result<String, TreeError> {
        let node = self.stack.pop().ok_or(TreeError::NothingOpen)?;
        let name = node.name.clone();
        match self.stack.last_mut() {
            Some(parent) => parent.values.push(Value::Node(node)),
            None => self.root = Some(node),
        }
        Ok(name)
    }

    /// Name of the element currently open, if any.
    pub fn current(&self) -> Option<&str> {
        self.stack.last().map(|node| node.name.as_str())
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_complete(&self) -> bool {
        self.root.is_some()
    }

    pub fn finish(self) -> Result<TreeNode, TreeError> {
        if !self.stack.is_empty() {
            return Err(TreeError::Unclosed(self.stack.len()));
        }
        self.root.ok_or(TreeError::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TreeNode {
        TreeNode::new("registration")
            .attr("id", "w1")
            .text("lead")
            .child(TreeNode::with_text("port", "2000"))
            .text("between")
            .child(
                TreeNode::new("attributes")
                    .child(TreeNode::with_text("attribute", "temperature"))
                    .child(TreeNode::with_text("attribute", "humidity")),
            )
            .child(TreeNode::with_text("port", "2001"))
    }

    #[test]
    fn test_builder_nests_and_orders_values() {
        let mut builder = TreeBuilder::new();
        builder.open("a", Attributes::new()).unwrap();
        builder.add_text("x").unwrap();
        builder.open("b", Attributes::new()).unwrap();
        builder.add_text("y").unwrap();
        assert_eq!(builder.close().unwrap(), "b");
        builder.add_text("z").unwrap();
        builder.open("c", Attributes::new()).unwrap();
        builder.close().unwrap();
        builder.close().unwrap();

        let tree = builder.finish().unwrap();
        let expected = TreeNode::new("a")
            .text("x")
            .child(TreeNode::with_text("b", "y"))
            .text("z")
            .child(TreeNode::new("c"));
        assert_eq!(tree, expected);
        assert_eq!(tree.count_children(), 2);
    }

    #[test]
    fn test_builder_child_count_matches_opens_per_level() {
        let mut builder = TreeBuilder::new();
        builder.open("root", Attributes::new()).unwrap();
        for _ in 0..3 {
            builder.open("level1", Attributes::new()).unwrap();
            for _ in 0..2 {
                builder.open("level2", Attributes::new()).unwrap();
                builder.close().unwrap();
            }
            builder.close().unwrap();
        }
        builder.close().unwrap();

        let tree = builder.finish().unwrap();
        assert_eq!(tree.count_children(), 3);
        assert!(tree.children().all(|c| c.count_children() == 2));
    }

    #[test]
    fn test_builder_rejects_misuse() {
        let mut builder = TreeBuilder::new();
        assert_eq!(builder.add_text("early"), Err(TreeError::NothingOpen));
        assert_eq!(builder.close(), Err(TreeError::NothingOpen));

        builder.open("root", Attributes::new()).unwrap();
        builder.close().unwrap();
        assert_eq!(
            builder.open("second", Attributes::new()),
            Err(TreeError::RootClosed("second".into()))
        );

        let mut unclosed = TreeBuilder::new();
        unclosed.open("root", Attributes::new()).unwrap();
        unclosed.open("inner", Attributes::new()).unwrap();
        assert_eq!(unclosed.finish(), Err(TreeError::Unclosed(2)));

        assert_eq!(TreeBuilder::new().finish(), Err(TreeError::Empty));
    }

    #[test]
    fn test_children_skip_text() {
        let tree = sample();
        let names: Vec<_> = tree.children().map(TreeNode::name).collect();
        assert_eq!(names, vec!["port", "attributes", "port"]);
        assert_eq!(tree.values().len(), 5);
    }

    #[test]
    fn test_nth_child_by_name_is_direct_and_one_indexed() {
        let tree = sample();
        assert_eq!(tree.nth_child_by_name("port", 1).unwrap().text_of("port"), Some("2000"));
        assert_eq!(tree.nth_child_by_name("port", 2).unwrap().text_of("port"), Some("2001"));
        assert!(tree.nth_child_by_name("port", 3).is_none());
        assert!(tree.nth_child_by_name("port", 0).is_none());
        // nested attribute nodes are not direct children
        assert!(tree.nth_child_by_name("attribute", 1).is_none());
        assert!(tree.child_by_name("attribute").is_none());
    }

    #[test]
    fn test_find_first_is_depth_first_and_includes_self() {
        let tree = sample();
        assert_eq!(tree.find_first("registration"), Some(&tree));
        assert_eq!(tree.text_of("attribute"), Some("temperature"));
        assert_eq!(tree.text_of("port"), Some("2000"));
        assert!(tree.find_first("missing").is_none());
        assert!(tree.find_first("").is_none());
    }

    #[test]
    fn test_exists_descendant_excludes_root() {
        let tree = sample();
        assert!(tree.exists_descendant("attribute"));
        assert!(tree.exists_descendant("port"));
        assert!(!tree.exists_descendant("registration"));
    }

    #[test]
    fn test_first_value_of_may_be_node() {
        let tree = sample();
        let first = tree.first_value_of("attributes").unwrap();
        assert_eq!(first.as_node().map(TreeNode::name), Some("attribute"));
        assert!(TreeNode::new("empty").first_value_of("empty").is_none());
    }

    #[test]
    fn test_display_renders_recursively() {
        let tree = TreeNode::new("a").attr("k", "v").text("t").child(TreeNode::new("b"));
        assert_eq!(tree.to_string(), r#"[a {k="v"} "t" [b]]"#);
    }

    #[test]
    fn test_adjacent_text_is_merged() {
        let tree = TreeNode::new("a").text("x").text("y").text("");
        assert_eq!(tree.values(), &[Value::Text("xy".into())]);

        let mut node = TreeNode::new("a");
        node.push("x");
        node.push(TreeNode::new("b"));
        node.push("y");
        node.push("z");
        assert_eq!(node.values().len(), 3);
        assert_eq!(node.values()[2], Value::Text("yz".into()));

        let mut builder = TreeBuilder::new();
        builder.open("a", Attributes::new()).unwrap();
        builder.add_text("x").unwrap();
        builder.add_text("y").unwrap();
        builder.close().unwrap();
        assert_eq!(builder.finish().unwrap(), TreeNode::with_text("a", "xy"));
    }
}
