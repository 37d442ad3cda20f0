//! Interface matching: structural conformance checks for services.
//!
//! A declarative [`InterfaceDescriptor`] is compiled once into an
//! [`Interface`], a reusable predicate that tests whether a candidate service
//! (or JSON object) carries every declared property with the declared kind.
//!
//! Descriptor forms:
//!   - **Names**: `["a", "b"]`: each property must hold an object-like value
//!   - **Shape**: `{"a": "function", "b": {"c": "string"}}`: kind tags or
//!     nested descriptors
//!   - **Compiled**: an existing `Interface`; compiling it again is a no-op

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::service::{Member, Service};
use crate::types::{Error, Result};

// =============================================================================
// Kinds
// =============================================================================

/// Expected kind of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Function,
    Object,
    Array,
    String,
    Number,
    Boolean,
}

impl Kind {
    /// Whether `member` satisfies this kind. `null` never does.
    pub fn accepts(self, member: &Member) -> bool {
        match (self, member) {
            (Kind::Function, Member::Function) => true,
            (Kind::Object, Member::Service(_)) => true,
            (Kind::Object, Member::Value(Value::Object(_) | Value::Array(_))) => true,
            (Kind::Array, Member::Value(Value::Array(_))) => true,
            (Kind::String, Member::Value(Value::String(_))) => true,
            (Kind::Number, Member::Value(Value::Number(_))) => true,
            (Kind::Boolean, Member::Value(Value::Bool(_))) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Function => "function",
            Kind::Object => "object",
            Kind::Array => "array",
            Kind::String => "string",
            Kind::Number => "number",
            Kind::Boolean => "boolean",
        }
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "function" => Ok(Kind::Function),
            "object" => Ok(Kind::Object),
            "array" => Ok(Kind::Array),
            "string" => Ok(Kind::String),
            "number" => Ok(Kind::Number),
            "boolean" => Ok(Kind::Boolean),
            other => Err(Error::interface(format!("unknown kind tag '{other}'"))),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Descriptors
// =============================================================================

/// What a single property must look like.
#[derive(Debug, Clone)]
pub enum Expectation {
    Kind(Kind),
    Nested(InterfaceDescriptor),
}

impl From<Kind> for Expectation {
    fn from(kind: Kind) -> Self {
        Expectation::Kind(kind)
    }
}

impl From<InterfaceDescriptor> for Expectation {
    fn from(desc: InterfaceDescriptor) -> Self {
        Expectation::Nested(desc)
    }
}

/// Declarative interface description, compiled by [`Interface::compile`].
#[derive(Debug, Clone)]
pub enum InterfaceDescriptor {
    Names(Vec<String>),
    Shape(Vec<(String, Expectation)>),
    Compiled(Interface),
}

impl InterfaceDescriptor {
    /// Property-name list form.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        InterfaceDescriptor::Names(names.into_iter().map(Into::into).collect())
    }

    /// Empty shape, extended with [`InterfaceDescriptor::expect`].
    pub fn shape() -> Self {
        InterfaceDescriptor::Shape(Vec::new())
    }

    /// Add a property expectation to a shape descriptor.
    ///
    /// A names descriptor is first widened into the equivalent shape.
    pub fn expect(self, property: impl Into<String>, expectation: impl Into<Expectation>) -> Self {
        let mut fields = match self {
            InterfaceDescriptor::Shape(fields) => fields,
            InterfaceDescriptor::Names(names) => names
                .into_iter()
                .map(|n| (n, Expectation::Kind(Kind::Object)))
                .collect(),
            InterfaceDescriptor::Compiled(iface) => iface.to_shape(),
        };
        fields.push((property.into(), expectation.into()));
        InterfaceDescriptor::Shape(fields)
    }

    /// Parse the JSON form: an array of names or an object of kind tags.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        Error::interface(format!("property name must be a string, got {item}"))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(InterfaceDescriptor::Names),
            Value::Object(map) => map
                .iter()
                .map(|(property, spec)| {
                    let expectation = match spec {
                        Value::String(tag) => Expectation::Kind(tag.parse()?),
                        Value::Object(_) | Value::Array(_) => {
                            Expectation::Nested(Self::from_json(spec)?)
                        }
                        other => {
                            return Err(Error::interface(format!(
                                "property '{property}' has invalid expectation {other}"
                            )))
                        }
                    };
                    Ok((property.clone(), expectation))
                })
                .collect::<Result<Vec<_>>>()
                .map(InterfaceDescriptor::Shape),
            other => Err(Error::interface(format!(
                "descriptor must be an array or object, got {other}"
            ))),
        }
    }
}

impl From<Interface> for InterfaceDescriptor {
    fn from(iface: Interface) -> Self {
        InterfaceDescriptor::Compiled(iface)
    }
}

impl From<&Interface> for InterfaceDescriptor {
    fn from(iface: &Interface) -> Self {
        InterfaceDescriptor::Compiled(iface.clone())
    }
}

impl From<Vec<&str>> for InterfaceDescriptor {
    fn from(names: Vec<&str>) -> Self {
        InterfaceDescriptor::names(names)
    }
}

impl<const N: usize> From<[&str; N]> for InterfaceDescriptor {
    fn from(names: [&str; N]) -> Self {
        InterfaceDescriptor::names(names)
    }
}

// =============================================================================
// Compiled Interface
// =============================================================================

#[derive(Debug, Clone)]
enum Rule {
    Kind(Kind),
    Nested(Interface),
}

#[derive(Debug, Clone)]
struct Check {
    property: String,
    rule: Rule,
}

/// Compiled conformance predicate. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Interface {
    checks: Arc<[Check]>,
}

/// Where property lookups are answered from.
enum Subject<'a> {
    Service(&'a dyn Service),
    Json(&'a Map<String, Value>),
    Opaque,
}

impl Subject<'_> {
    fn lookup(&self, property: &str) -> Option<Member> {
        match self {
            Subject::Service(svc) => svc.member(property),
            Subject::Json(map) => map.get(property).cloned().map(Member::Value),
            Subject::Opaque => None,
        }
    }
}

impl Interface {
    /// Compile a descriptor into a predicate.
    pub fn compile(descriptor: impl Into<InterfaceDescriptor>) -> Result<Self> {
        match descriptor.into() {
            InterfaceDescriptor::Compiled(iface) => Ok(iface),
            InterfaceDescriptor::Names(names) => Self::from_checks(
                names
                    .into_iter()
                    .map(|property| (property, Rule::Kind(Kind::Object)))
                    .collect(),
            ),
            InterfaceDescriptor::Shape(fields) => {
                let mut rules = Vec::with_capacity(fields.len());
                for (property, expectation) in fields {
                    let rule = match expectation {
                        Expectation::Kind(kind) => Rule::Kind(kind),
                        Expectation::Nested(desc) => Rule::Nested(Self::compile(desc)?),
                    };
                    rules.push((property, rule));
                }
                Self::from_checks(rules)
            }
        }
    }

    fn from_checks(rules: Vec<(String, Rule)>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut checks = Vec::with_capacity(rules.len());
        for (property, rule) in rules {
            if property.is_empty() {
                return Err(Error::interface("property name cannot be empty"));
            }
            if !seen.insert(property.clone()) {
                return Err(Error::interface(format!(
                    "property '{property}' declared twice"
                )));
            }
            checks.push(Check { property, rule });
        }
        Ok(Self {
            checks: checks.into(),
        })
    }

    /// Whether `candidate` conforms.
    pub fn matches(&self, candidate: &dyn Service) -> bool {
        self.check(&Subject::Service(candidate))
    }

    /// Whether a JSON value conforms.
    pub fn matches_value(&self, candidate: &Value) -> bool {
        match candidate {
            Value::Object(map) => self.check(&Subject::Json(map)),
            _ => self.check(&Subject::Opaque),
        }
    }

    /// Declared property names, in declaration order.
    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.checks.iter().map(|c| c.property.as_str())
    }

    fn check(&self, subject: &Subject<'_>) -> bool {
        self.checks.iter().all(|check| {
            let Some(member) = subject.lookup(&check.property) else {
                return false;
            };
            match &check.rule {
                Rule::Kind(kind) => kind.accepts(&member),
                Rule::Nested(nested) => match &member {
                    Member::Value(Value::Null) => false,
                    Member::Service(svc) => nested.matches(svc.as_ref()),
                    Member::Value(value) => nested.matches_value(value),
                    Member::Function => nested.check(&Subject::Opaque),
                },
            }
        })
    }

    fn to_shape(&self) -> Vec<(String, Expectation)> {
        self.checks
            .iter()
            .map(|c| {
                let expectation = match &c.rule {
                    Rule::Kind(kind) => Expectation::Kind(*kind),
                    Rule::Nested(iface) => {
                        Expectation::Nested(InterfaceDescriptor::Compiled(iface.clone()))
                    }
                };
                (c.property.clone(), expectation)
            })
            .collect()
    }
}
