//! Container bodies

use std::collections::BTreeMap;

use crate::expr::{Expr, IntoExpr, NodeRef};
use crate::types::ImagePullPolicy;

/// Environment variable value
#[derive(Debug, Clone, PartialEq)]
pub enum EnvSource {
    Value(Expr),
    /// `valueFrom.secretKeyRef`; the secret is never read here
    SecretKey {
        secret: Expr<String>,
        key: String,
        optional: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvVar {
    pub name: String,
    pub source: EnvSource,
}

/// Requests and limits keyed by resource name (`cpu`, `memory`, ...)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceRequirements {
    pub requests: BTreeMap<String, Expr>,
    pub limits: BTreeMap<String, Expr>,
}

impl ResourceRequirements {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.limits.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub image: Option<Expr<String>>,
    pub pull_policy: Option<Expr<ImagePullPolicy>>,
    pub command: Vec<Expr>,
    pub args: Vec<Expr>,
    pub env: Vec<EnvVar>,
    pub resources: ResourceRequirements,
}

impl ContainerSpec {
    /// Every expression in the body, for validation walks
    pub fn expressions(&self) -> Vec<(String, &NodeRef)> {
        let mut out = Vec::new();
        if let Some(image) = &self.image {
            out.push(("image".to_string(), image.node()));
        }
        if let Some(policy) = &self.pull_policy {
            out.push(("imagePullPolicy".to_string(), policy.node()));
        }
        for (i, c) in self.command.iter().enumerate() {
            out.push((format!("command[{}]", i), c.node()));
        }
        for (i, a) in self.args.iter().enumerate() {
            out.push((format!("args[{}]", i), a.node()));
        }
        for var in &self.env {
            match &var.source {
                EnvSource::Value(v) => out.push((format!("env.{}", var.name), v.node())),
                EnvSource::SecretKey { secret, .. } => {
                    out.push((format!("env.{}.secret", var.name), secret.node()))
                }
            }
        }
        for (k, v) in &self.resources.requests {
            out.push((format!("resources.requests.{}", k), v.node()));
        }
        for (k, v) in &self.resources.limits {
            out.push((format!("resources.limits.{}", k), v.node()));
        }
        out
    }
}

/// Fluent container description
#[derive(Debug, Clone, Default)]
pub struct ContainerBuilder {
    spec: ContainerSpec,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image and pull policy, typically supplied by the caller at call time
    pub fn image_info(
        mut self,
        image: impl Into<Expr<String>>,
        pull_policy: impl Into<Expr<ImagePullPolicy>>,
    ) -> Self {
        self.spec.image = Some(image.into());
        self.spec.pull_policy = Some(pull_policy.into());
        self
    }

    pub fn image(mut self, image: impl Into<Expr<String>>) -> Self {
        self.spec.image = Some(image.into());
        self
    }

    pub fn command(mut self, command: &[&str]) -> Self {
        self.spec.command = command.iter().map(|c| Expr::from_node((*c).into_node())).collect();
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = NodeRef>) -> Self {
        self.spec.args = args.into_iter().map(Expr::from_node).collect();
        self
    }

    pub fn env(mut self, name: &str, value: impl IntoExpr) -> Self {
        self.spec.env.push(EnvVar {
            name: name.to_string(),
            source: EnvSource::Value(Expr::from_node(value.into_node())),
        });
        self
    }

    pub fn env_from_secret(
        mut self,
        name: &str,
        secret: impl Into<Expr<String>>,
        key: &str,
        optional: bool,
    ) -> Self {
        self.spec.env.push(EnvVar {
            name: name.to_string(),
            source: EnvSource::SecretKey {
                secret: secret.into(),
                key: key.to_string(),
                optional,
            },
        });
        self
    }

    pub fn request(mut self, resource: &str, amount: impl IntoExpr) -> Self {
        self.spec
            .resources
            .requests
            .insert(resource.to_string(), Expr::from_node(amount.into_node()));
        self
    }

    pub fn limit(mut self, resource: &str, amount: impl IntoExpr) -> Self {
        self.spec
            .resources
            .limits
            .insert(resource.to_string(), Expr::from_node(amount.into_node()));
        self
    }

    pub fn build(self) -> ContainerSpec {
        self.spec
    }
}

impl From<ImagePullPolicyValue> for Expr<ImagePullPolicy> {
    fn from(policy: ImagePullPolicyValue) -> Self {
        crate::expr::literal(policy.as_str()).cast()
    }
}

/// Fixed pull policies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePullPolicyValue {
    Always,
    IfNotPresent,
    Never,
}

impl ImagePullPolicyValue {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Always => "Always",
            Self::IfNotPresent => "IfNotPresent",
            Self::Never => "Never",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exprs;
    use crate::expr::literal;

    #[test]
    fn test_builder_collects_expressions() {
        let spec = ContainerBuilder::new()
            .image_info("migrations/console:latest", ImagePullPolicyValue::IfNotPresent)
            .command(&["/bin/sh", "-c"])
            .args(exprs!["echo", literal(2i64)])
            .env("LOG_LEVEL", "info")
            .env_from_secret("PASSWORD", "source-creds", "password", true)
            .request("cpu", "250m")
            .limit("memory", "1Gi")
            .build();

        let paths: Vec<String> = spec.expressions().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec![
                "image",
                "imagePullPolicy",
                "command[0]",
                "command[1]",
                "args[0]",
                "args[1]",
                "env.LOG_LEVEL",
                "env.PASSWORD.secret",
                "resources.requests.cpu",
                "resources.limits.memory",
            ]
        );
    }
}
