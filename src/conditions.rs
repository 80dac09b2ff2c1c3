use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};

/// Boolean expression tree as found in the datafile.
///
/// The JSON form is a list whose first element may be an operator (`"and"`, `"or"`, `"not"`),
/// followed by child expressions. A list without an operator is an implicit `"or"`, and anything
/// that is not a list is a leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionTree<L> {
    /// All children must match.
    And(Vec<ConditionTree<L>>),
    /// At least one child must match.
    Or(Vec<ConditionTree<L>>),
    /// Negates the first child.
    Not(Vec<ConditionTree<L>>),
    /// A single condition.
    Leaf(L),
}

impl<L> ConditionTree<L> {
    /// `true` for an operator-less empty list (`[]`), which places no restriction on the user.
    pub fn is_empty(&self) -> bool {
        matches!(self, ConditionTree::Or(children) if children.is_empty())
    }

    /// Evaluate the tree with three-valued logic. `None` means the result is unknown (e.g., an
    /// attribute is missing or of the wrong type).
    pub fn evaluate(&self, leaf: &mut impl FnMut(&L) -> Option<bool>) -> Option<bool> {
        match self {
            ConditionTree::And(children) => {
                let mut saw_unknown = false;
                for child in children {
                    match child.evaluate(leaf) {
                        Some(false) => return Some(false),
                        None => saw_unknown = true,
                        Some(true) => {}
                    }
                }
                if saw_unknown {
                    None
                } else {
                    Some(true)
                }
            }
            ConditionTree::Or(children) => {
                let mut saw_unknown = false;
                for child in children {
                    match child.evaluate(leaf) {
                        Some(true) => return Some(true),
                        None => saw_unknown = true,
                        Some(false) => {}
                    }
                }
                if saw_unknown {
                    None
                } else {
                    Some(false)
                }
            }
            ConditionTree::Not(children) => children.first()?.evaluate(leaf).map(|v| !v),
            ConditionTree::Leaf(l) => leaf(l),
        }
    }

    fn operator(&self) -> Option<&'static str> {
        match self {
            ConditionTree::And(_) => Some("and"),
            ConditionTree::Or(_) => Some("or"),
            ConditionTree::Not(_) => Some("not"),
            ConditionTree::Leaf(_) => None,
        }
    }
}

impl<L: DeserializeOwned> ConditionTree<L> {
    /// Build a tree from its JSON representation.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let serde_json::Value::Array(items) = value else {
            return Ok(ConditionTree::Leaf(serde_json::from_value(value)?));
        };

        let mut items = items.into_iter().peekable();
        let operator = match items.peek() {
            Some(serde_json::Value::String(s)) if is_operator(s) => {
                let op = s.clone();
                items.next();
                op
            }
            _ => "or".to_owned(),
        };

        let children = items.map(Self::from_json).collect::<Result<Vec<_>, _>>()?;

        Ok(match operator.as_str() {
            "and" => ConditionTree::And(children),
            "not" => ConditionTree::Not(children),
            _ => ConditionTree::Or(children),
        })
    }
}

fn is_operator(s: &str) -> bool {
    matches!(s, "and" | "or" | "not")
}

impl<'de, L: DeserializeOwned> Deserialize<'de> for ConditionTree<L> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_json(value).map_err(serde::de::Error::custom)
    }
}

impl<L: Serialize> Serialize for ConditionTree<L> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;

        match self {
            ConditionTree::Leaf(l) => l.serialize(serializer),
            ConditionTree::And(children)
            | ConditionTree::Or(children)
            | ConditionTree::Not(children) => {
                let mut seq = serializer.serialize_seq(Some(children.len() + 1))?;
                seq.serialize_element(&self.operator())?;
                for child in children {
                    seq.serialize_element(child)?;
                }
                seq.end()
            }
        }
    }
}

/// A leaf condition of an audience: compares one user attribute against a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeCondition {
    pub name: String,
    #[serde(rename = "type")]
    pub condition_type: String,
    #[serde(rename = "match", default)]
    pub match_type: Option<MatchType>,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// How an [`AttributeCondition`] compares the attribute to its value. Absent means `Exact`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Exists,
    Substring,
    Gt,
    Ge,
    Lt,
    Le,
    SemverEq,
    SemverLt,
    SemverLe,
    SemverGt,
    SemverGe,
    #[serde(other)]
    Unknown,
}
