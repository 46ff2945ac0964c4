//! Parameter model
//!
//! A [`ParamDef`] is one declared input (or workflow-level parameter). Inputs
//! are kept in declaration order; that order is also the order arguments are
//! rendered in at call sites.

use crate::error::{ForgeError, Result};
use crate::expr::{Expr, Node};
use crate::types::{Shape, Shaped, TypeToken};

use std::sync::Arc;

/// Where an optional parameter gets its value when the caller binds none
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    /// Expression over the owning template's earlier inputs
    Default(Expr),
    /// Looked up in a ConfigMap by the orchestrator (`valueFrom.configMapKeyRef`)
    ConfigMapKey { map: Expr<String>, key: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub name: String,
    pub shape: Shape,
    pub required: bool,
    pub source: Option<ValueSource>,
    pub description: Option<String>,
}

impl ParamDef {
    pub fn required<T: Shaped>(name: &str, _token: TypeToken<T>) -> Self {
        Self {
            name: name.to_string(),
            shape: T::shape(),
            required: true,
            source: None,
            description: None,
        }
    }

    pub fn optional<T>(name: &str, default: Expr<T>) -> Self {
        Self {
            name: name.to_string(),
            shape: default.shape(),
            required: false,
            source: Some(ValueSource::Default(default.erase())),
            description: None,
        }
    }

    pub fn config_map_key(name: &str, map: impl Into<Expr<String>>, key: &str) -> Self {
        Self {
            name: name.to_string(),
            shape: Shape::String,
            required: false,
            source: Some(ValueSource::ConfigMapKey {
                map: map.into(),
                key: key.to_string(),
            }),
            description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn default_expr(&self) -> Option<&Expr> {
        match &self.source {
            Some(ValueSource::Default(e)) => Some(e),
            _ => None,
        }
    }

    /// Check the required/default invariant
    pub fn validate(&self, owner: &str) -> Result<()> {
        validate_name(&self.name)?;
        if self.required && self.source.is_some() {
            return Err(ForgeError::RequiredWithDefault {
                name: self.name.clone(),
                owner: owner.to_string(),
            });
        }
        Ok(())
    }
}

/// Parameter names end up in `{{inputs.parameters.<name>}}` tags
pub fn validate_name(name: &str) -> Result<()> {
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ForgeError::InvalidName {
            name: name.to_string(),
            reason: "must start with a letter and contain only letters, digits, '_' or '-'"
                .to_string(),
        })
    }
}

/// Optional parameter for a shared record
pub fn define_param<T>(name: &str, default: impl Into<Expr<T>>) -> ParamDef {
    ParamDef::optional(name, default.into())
}

/// Required parameter for a shared record
pub fn define_required_param<T: Shaped>(
    name: &str,
    token: TypeToken<T>,
    description: Option<&str>,
) -> ParamDef {
    let def = ParamDef::required(name, token);
    match description {
        Some(d) => def.with_description(d),
        None => def,
    }
}

/// Reusable bundle of parameter definitions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamRecord {
    params: Vec<ParamDef>,
}

impl ParamRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, def: ParamDef) -> Self {
        self.params.push(def);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamDef> {
        self.params.iter()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl FromIterator<ParamDef> for ParamRecord {
    fn from_iter<I: IntoIterator<Item = ParamDef>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}

/// Ordered, name-unique parameter set owned by one template (or workflow)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSet {
    owner: String,
    defs: Vec<ParamDef>,
}

impl ParamSet {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            defs: Vec::new(),
        }
    }

    pub fn add(&mut self, def: ParamDef) -> Result<()> {
        def.validate(&self.owner)?;
        if self.get(&def.name).is_some() {
            return Err(ForgeError::DuplicateParameter {
                name: def.name,
                owner: self.owner.clone(),
            });
        }
        self.defs.push(def);
        Ok(())
    }

    /// Merge a record; any collision fails before anything is added
    pub fn add_record(&mut self, record: &ParamRecord) -> Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for def in record.iter() {
            def.validate(&self.owner)?;
            if self.get(&def.name).is_some() || !seen.insert(def.name.as_str()) {
                return Err(ForgeError::DuplicateParameter {
                    name: def.name.clone(),
                    owner: self.owner.clone(),
                });
            }
        }
        self.defs.extend(record.iter().cloned());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ParamDef> {
        self.defs.iter().find(|d| d.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParamDef> {
        self.defs.iter()
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Read handle over the parameters declared so far
    pub fn scope(&self) -> InputScope {
        InputScope {
            owner: self.owner.clone(),
            params: self
                .defs
                .iter()
                .map(|d| (d.name.clone(), d.shape.clone()))
                .collect(),
        }
    }
}

/// Snapshot of a template's declared inputs
///
/// Handed to default-value closures and to call registrations; every lookup
/// yields an `inputs.parameters.<name>` reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputScope {
    owner: String,
    params: Vec<(String, Shape)>,
}

impl InputScope {
    pub fn get<T>(&self, name: &str) -> Result<Expr<T>> {
        let shape = self
            .shape_of(name)
            .ok_or_else(|| ForgeError::UnknownInput {
                name: name.to_string(),
                owner: self.owner.clone(),
            })?;
        Ok(Expr::from_node(Arc::new(Node::InputParam {
            name: name.to_string(),
            shape: shape.clone(),
        })))
    }

    pub fn shape_of(&self, name: &str) -> Option<&Shape> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.shape_of(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(n, _)| n.as_str())
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::literal;
    use crate::types::type_token;

    #[test]
    fn test_required_with_default_rejected() {
        let mut def = ParamDef::required("x", type_token::<String>());
        def.source = Some(ValueSource::Default(literal("a").erase()));
        let mut set = ParamSet::new("t");
        let err = set.add(def).unwrap_err();
        assert_eq!(err.code(), "FORGE-011");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut set = ParamSet::new("t");
        set.add(ParamDef::required("x", type_token::<String>()))
            .unwrap();
        let err = set
            .add(define_param("x", literal("b")))
            .unwrap_err();
        assert_eq!(err.code(), "FORGE-010");
    }

    #[test]
    fn test_record_collision_is_atomic() {
        let mut set = ParamSet::new("t");
        set.add(ParamDef::required("shared", type_token::<String>()))
            .unwrap();
        let record = ParamRecord::new()
            .with(define_param("fresh", literal(1i64)))
            .with(define_required_param("shared", type_token::<String>(), None));
        assert_eq!(set.add_record(&record).unwrap_err().code(), "FORGE-010");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_scope_lookup() {
        let mut set = ParamSet::new("t");
        set.add(ParamDef::required("n", type_token::<i64>())).unwrap();
        let scope = set.scope();
        let n: Expr<i64> = scope.get("n").unwrap();
        assert_eq!(n.shape(), Shape::Number);
        assert_eq!(scope.get::<i64>("m").unwrap_err().code(), "FORGE-012");
    }

    #[test]
    fn test_invalid_names() {
        assert!(validate_name("cluster-name").is_ok());
        assert!(validate_name("1abc").is_err());
        assert!(validate_name("a.b").is_err());
        assert!(validate_name("").is_err());
    }
}
