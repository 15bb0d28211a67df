use crate::page::Node;

/// A structural element pattern, the subset of CSS selectors the adapters rely on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Tag(String),
    Id(String),
    Class(String),
    ClassContains(String),
    IdContains(String),
    Attr(String, String),
    Any(Vec<Selector>),
    All(Vec<Selector>),
}

impl Selector {
    pub fn tag(tag: &str) -> Self {
        Self::Tag(tag.to_ascii_lowercase())
    }

    pub fn id(id: &str) -> Self {
        Self::Id(id.to_string())
    }

    pub fn class(class: &str) -> Self {
        Self::Class(class.to_string())
    }

    pub fn class_contains(fragment: &str) -> Self {
        Self::ClassContains(fragment.to_string())
    }

    pub fn id_contains(fragment: &str) -> Self {
        Self::IdContains(fragment.to_string())
    }

    pub fn attr(name: &str, value: &str) -> Self {
        Self::Attr(name.to_string(), value.to_string())
    }

    pub fn any(selectors: impl IntoIterator<Item = Selector>) -> Self {
        Self::Any(selectors.into_iter().collect())
    }

    pub fn all(selectors: impl IntoIterator<Item = Selector>) -> Self {
        Self::All(selectors.into_iter().collect())
    }

    pub fn matches(&self, node: &Node) -> bool {
        match self {
            Self::Tag(tag) => node.tag() == tag,
            Self::Id(id) => node.attr("id") == Some(id.as_str()),
            Self::Class(class) => node.has_class(class),
            // `[class*=x]` matches against the raw attribute, not individual classes
            Self::ClassContains(fragment) => node
                .attr("class")
                .is_some_and(|class| class.contains(fragment.as_str())),
            Self::IdContains(fragment) => node
                .attr("id")
                .is_some_and(|id| id.contains(fragment.as_str())),
            Self::Attr(name, value) => node.attr(name) == Some(value.as_str()),
            Self::Any(selectors) => selectors.iter().any(|s| s.matches(node)),
            Self::All(selectors) => selectors.iter().all(|s| s.matches(node)),
        }
    }
}
