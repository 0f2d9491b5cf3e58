//! Boolean search expressions over component descriptions.
//!
//! A [`Query`] is either a leaf [`QueryItem`] (one selector and comparison)
//! or an AND/OR/NOT composite. It can be evaluated two ways:
//!
//! - [`Query::evaluate_all`] against a [`DataModel`], producing one
//!   [`MatchArray`] entry per known component. Leaves read the model's
//!   inverted index tables and composites combine their children's arrays
//!   entrywise.
//! - [`Query::evaluate_one`] against a single [`ComponentDescription`],
//!   without touching any index.

use std::collections::{BTreeMap, BTreeSet};

use crate::element::{Comparison, ComponentDescription, DescriptionElement, ElementKind};
use crate::lease::ComponentIndex;
use crate::tree::TreeNode;

/// Inverted index for one element kind: value to the components carrying it.
pub type IndexTable = BTreeMap<String, BTreeSet<ComponentIndex>>;

/// Indexed store of component descriptions that queries read from.
pub trait DataModel {
    /// One unmatched entry per known component, ascending by index.
    fn empty_match_array(&self) -> MatchArray;

    fn index_table_for(&self, kind: ElementKind) -> Option<&IndexTable>;
}

/// Per-component match flags, ordered by component index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchArray {
    entries: Vec<(ComponentIndex, bool)>,
}

impl MatchArray {
    pub fn new(indexes: impl IntoIterator<Item = ComponentIndex>) -> Self {
        let mut indexes: Vec<_> = indexes.into_iter().collect();
        indexes.sort_unstable();
        indexes.dedup();
        Self {
            entries: indexes.into_iter().map(|index| (index, false)).collect(),
        }
    }

    /// Flags `index` as matched. Indexes outside the population are ignored.
    pub fn mark(&mut self, index: ComponentIndex) -> bool {
        match self.entries.binary_search_by_key(&index, |(i, _)| *i) {
            Ok(position) => {
                self.entries[position].1 = true;
                true
            }
            Err(_) => false,
        }
    }

    pub fn get(&self, index: ComponentIndex) -> Option<bool> {
        self.entries
            .binary_search_by_key(&index, |(i, _)| *i)
            .ok()
            .map(|position| self.entries[position].1)
    }

    pub fn entries(&self) -> &[(ComponentIndex, bool)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matching(&self) -> impl Iterator<Item = ComponentIndex> + '_ {
        self.entries
            .iter()
            .filter(|(_, matched)| *matched)
            .map(|(index, _)| *index)
    }

    pub fn and(self, other: &MatchArray) -> MatchArray {
        self.combine(other, |a, b| a && b)
    }

    pub fn or(self, other: &MatchArray) -> MatchArray {
        self.combine(other, |a, b| a || b)
    }

    pub fn not(mut self) -> MatchArray {
        for entry in &mut self.entries {
            entry.1 = !entry.1;
        }
        self
    }

    // Both arrays come from the same model, so positions line up.
    fn combine(mut self, other: &MatchArray, op: impl Fn(bool, bool) -> bool) -> MatchArray {
        debug_assert_eq!(self.entries.len(), other.entries.len());
        for (mine, theirs) in self.entries.iter_mut().zip(&other.entries) {
            debug_assert_eq!(mine.0, theirs.0);
            mine.1 = op(mine.1, theirs.1);
        }
        self
    }
}

pub const QUERY_ITEM: &str = "queryItem";
pub const AND: &str = "and";
pub const OR: &str = "or";
pub const NOT: &str = "not";

/// Leaf predicate: `<element kind> <comparison> <value>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryItem {
    pub element: DescriptionElement,
    pub comparison: Comparison,
}

impl QueryItem {
    pub fn new(kind: ElementKind, value: impl Into<String>, comparison: Comparison) -> Self {
        Self {
            element: DescriptionElement::new(kind, value),
            comparison,
        }
    }

    pub fn evaluate_all<M: DataModel + ?Sized>(&self, model: &M) -> MatchArray {
        let mut result = model.empty_match_array();
        let Some(table) = model.index_table_for(self.element.kind) else {
            return result;
        };

        let target = &self.element.value;
        if self.comparison == Comparison::Equal {
            if let Some(indexes) = table.get(target) {
                for index in indexes {
                    result.mark(*index);
                }
            }
        } else {
            // ordering predicates cannot use the equality index
            for (key, indexes) in table {
                if self.comparison.matches(key, target) {
                    for index in indexes {
                        result.mark(*index);
                    }
                }
            }
        }
        result
    }

    pub fn evaluate_one(&self, component: &ComponentDescription) -> bool {
        component
            .values_of(self.element.kind)
            .iter()
            .any(|value| self.comparison.matches(value, &self.element.value))
    }

    pub fn to_tree(&self) -> TreeNode {
        TreeNode::new(QUERY_ITEM)
            .attr("kind", self.element.kind.as_str())
            .attr("comparison", self.comparison.as_str())
            .text(self.element.value.clone())
    }

    fn from_tree(node: &TreeNode) -> Option<Self> {
        let kind = node.attribute("kind")?.parse().ok()?;
        let comparison = node.attribute("comparison")?.parse().ok()?;
        let value = match node.values().first() {
            Some(value) => value.as_text()?.to_string(),
            None => String::new(),
        };
        Some(Self::new(kind, value, comparison))
    }
}

/// A search expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Item(QueryItem),
    And(Box<Query>, Box<Query>),
    Or(Box<Query>, Box<Query>),
    Not(Box<Query>),
}

impl Query {
    pub fn item(kind: ElementKind, value: impl Into<String>, comparison: Comparison) -> Self {
        Query::Item(QueryItem::new(kind, value, comparison))
    }

    pub fn and(left: Query, right: Query) -> Self {
        Query::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Query, right: Query) -> Self {
        Query::Or(Box::new(left), Box::new(right))
    }

    pub fn not(left: Query) -> Self {
        Query::Not(Box::new(left))
    }

    pub fn evaluate_all<M: DataModel + ?Sized>(&self, model: &M) -> MatchArray {
        match self {
            Query::Item(item) => item.evaluate_all(model),
            Query::And(left, right) => left.evaluate_all(model).and(&right.evaluate_all(model)),
            Query::Or(left, right) => left.evaluate_all(model).or(&right.evaluate_all(model)),
            Query::Not(left) => left.evaluate_all(model).not(),
        }
    }

    pub fn evaluate_one(&self, component: &ComponentDescription) -> bool {
        match self {
            Query::Item(item) => item.evaluate_one(component),
            Query::And(left, right) => {
                left.evaluate_one(component) && right.evaluate_one(component)
            }
            Query::Or(left, right) => {
                left.evaluate_one(component) || right.evaluate_one(component)
            }
            Query::Not(left) => !left.evaluate_one(component),
        }
    }

    pub fn to_tree(&self) -> TreeNode {
        match self {
            Query::Item(item) => item.to_tree(),
            Query::And(left, right) => {
                TreeNode::new(AND).child(left.to_tree()).child(right.to_tree())
            }
            Query::Or(left, right) => {
                TreeNode::new(OR).child(left.to_tree()).child(right.to_tree())
            }
            Query::Not(left) => TreeNode::new(NOT).child(left.to_tree()),
        }
    }

    /// Rebuilds a query from its tree form.
    ///
    /// Returns `None` for an unrecognized node name or a malformed operand;
    /// callers must treat that as a decode failure. A `not` node with more
    /// than one operand keeps only the first.
    pub fn from_tree(node: &TreeNode) -> Option<Self> {
        let mut operands = node.children();
        match node.name() {
            QUERY_ITEM => QueryItem::from_tree(node).map(Query::Item),
            AND | OR => {
                let left = Query::from_tree(operands.next()?)?;
                let right = Query::from_tree(operands.next()?)?;
                Some(if node.name() == AND {
                    Query::and(left, right)
                } else {
                    Query::or(left, right)
                })
            }
            NOT => Some(Query::not(Query::from_tree(operands.next()?)?)),
            _ => None,
        }
    }
}

impl From<QueryItem> for Query {
    fn from(item: QueryItem) -> Self {
        Query::Item(item)
    }
}
