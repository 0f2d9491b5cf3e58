//! Component descriptions and the comparisons queries apply to them.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::lease::ComponentIndex;

/// Kind of a description element; also the selector kind of a query leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementKind {
    Id,
    Hostname,
    Port,
    Type,
    Attribute,
    Callback,
    Service,
}

impl ElementKind {
    pub const ALL: [ElementKind; 7] = [
        ElementKind::Id,
        ElementKind::Hostname,
        ElementKind::Port,
        ElementKind::Type,
        ElementKind::Attribute,
        ElementKind::Callback,
        ElementKind::Service,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Id => "id",
            ElementKind::Hostname => "hostname",
            ElementKind::Port => "port",
            ElementKind::Type => "type",
            ElementKind::Attribute => "attribute",
            ElementKind::Callback => "callback",
            ElementKind::Service => "service",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ElementKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown element kind '{}'", s))
    }
}

/// A selector: the element kind plus the value to match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DescriptionElement {
    pub kind: ElementKind,
    pub value: String,
}

impl DescriptionElement {
    pub fn new(kind: ElementKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Comparison {
    Equal,
    Different,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

impl Comparison {
    pub const ALL: [Comparison; 6] = [
        Comparison::Equal,
        Comparison::Different,
        Comparison::Greater,
        Comparison::GreaterEqual,
        Comparison::Less,
        Comparison::LessEqual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Comparison::Equal => "equal",
            Comparison::Different => "different",
            Comparison::Greater => "greater",
            Comparison::GreaterEqual => "greaterEqual",
            Comparison::Less => "less",
            Comparison::LessEqual => "lessEqual",
        }
    }

    /// Operator form used on the command line, e.g. `port>=1520`.
    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Equal => "=",
            Comparison::Different => "!=",
            Comparison::Greater => ">",
            Comparison::GreaterEqual => ">=",
            Comparison::Less => "<",
            Comparison::LessEqual => "<=",
        }
    }

    /// Applies `candidate <op> target`.
    ///
    /// Equality is exact string equality, so it agrees with an index lookup.
    /// Ordering comparisons treat both sides as numbers when both parse as
    /// one, as strings otherwise.
    pub fn matches(self, candidate: &str, target: &str) -> bool {
        let ordering = || compare_values(candidate, target);
        match self {
            Comparison::Equal => candidate == target,
            Comparison::Different => candidate != target,
            Comparison::Greater => ordering() == Ordering::Greater,
            Comparison::GreaterEqual => ordering() != Ordering::Less,
            Comparison::Less => ordering() == Ordering::Less,
            Comparison::LessEqual => ordering() != Ordering::Greater,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparison {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Comparison::ALL
            .into_iter()
            .find(|cmp| cmp.as_str() == s)
            .ok_or_else(|| format!("unknown comparison '{}'", s))
    }
}

/// Numeric order when both sides are finite numbers, string order otherwise.
fn compare_values(a: &str, b: &str) -> Ordering {
    match (finite(a), finite(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.cmp(b),
    }
}

fn finite(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Everything the registry knows about one registered component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescription {
    pub index: ComponentIndex,
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub component_type: String,
    pub attributes: Vec<String>,
    pub callbacks: Vec<String>,
    pub services: Vec<String>,
}

impl ComponentDescription {
    pub fn new(index: ComponentIndex, id: impl Into<String>) -> Self {
        Self {
            index,
            id: id.into(),
            hostname: String::new(),
            port: 0,
            component_type: String::new(),
            attributes: Vec::new(),
            callbacks: Vec::new(),
            services: Vec::new(),
        }
    }

    /// Flattened description elements, as indexed by the data model.
    pub fn elements(&self) -> Vec<DescriptionElement> {
        let mut elements = vec![
            DescriptionElement::new(ElementKind::Id, &self.id),
            DescriptionElement::new(ElementKind::Port, self.port.to_string()),
        ];
        if !self.hostname.is_empty() {
            elements.push(DescriptionElement::new(ElementKind::Hostname, &self.hostname));
        }
        if !self.component_type.is_empty() {
            elements.push(DescriptionElement::new(ElementKind::Type, &self.component_type));
        }
        let lists = [
            (ElementKind::Attribute, &self.attributes),
            (ElementKind::Callback, &self.callbacks),
            (ElementKind::Service, &self.services),
        ];
        for (kind, values) in lists {
            elements.extend(values.iter().map(|value| DescriptionElement::new(kind, value)));
        }
        elements
    }

    pub fn values_of(&self, kind: ElementKind) -> Vec<String> {
        self.elements()
            .into_iter()
            .filter(|element| element.kind == kind)
            .map(|element| element.value)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_comparison_when_both_numbers() {
        assert!(Comparison::GreaterEqual.matches("2000", "1520"));
        assert!(Comparison::Less.matches("999", "1520"));
        assert!(Comparison::GreaterEqual.matches("1520.0", "1520"));
        assert!(!Comparison::Equal.matches("1520.0", "1520"));
        assert!(Comparison::Different.matches("1521", "1520"));
    }

    #[test]
    fn test_lexicographic_comparison_otherwise() {
        assert!(Comparison::Greater.matches("beta", "alpha"));
        assert!(Comparison::LessEqual.matches("alpha", "alpha"));
        assert!(!Comparison::Equal.matches("w1", "W1"));
    }

    #[test]
    fn test_non_finite_values_compare_as_strings() {
        assert!(Comparison::GreaterEqual.matches("nan", "5"));
        assert!(!Comparison::LessEqual.matches("nan", "5"));
        assert!(Comparison::Greater.matches("inf", "5"));
        assert!(!Comparison::Less.matches("infinity", "5"));
        assert!(Comparison::Less.matches("-inf", "5"));
    }

    #[test]
    fn test_kind_and_comparison_names_parse() {
        for kind in ElementKind::ALL {
            assert_eq!(kind.as_str().parse::<ElementKind>(), Ok(kind));
        }
        for cmp in Comparison::ALL {
            assert_eq!(cmp.as_str().parse::<Comparison>(), Ok(cmp));
        }
        assert!("colour".parse::<ElementKind>().is_err());
    }

    #[test]
    fn test_elements_flatten_description() {
        let mut description = ComponentDescription::new(ComponentIndex(7), "w1");
        description.port = 2000;
        description.attributes = vec!["temperature".into(), "humidity".into()];
        description.services = vec!["display".into()];

        let elements = description.elements();
        assert!(elements.contains(&DescriptionElement::new(ElementKind::Id, "w1")));
        assert!(elements.contains(&DescriptionElement::new(ElementKind::Port, "2000")));
        assert!(!elements.iter().any(|e| e.kind == ElementKind::Hostname));
        assert_eq!(description.values_of(ElementKind::Attribute), vec!["temperature", "humidity"]);
        assert_eq!(description.values_of(ElementKind::Service), vec!["display"]);
    }
}
