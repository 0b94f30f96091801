//! C3: name→factory map, lazy dependency-ordered instantiation,
//! reflection-replacement method dispatch.
//!
//! The source language resolves classes and methods by runtime
//! property lookup; here that becomes an explicit name→factory map and
//! a per-target dispatch table ([`Invokable`]) whose entries accept a
//! structured parameter value instead of arbitrary reflection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::schema::ParamMap;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("cyclic dependency detected while constructing {0}: {1:?}")]
    CyclicDependency(String, Vec<String>),
    #[error("no factory registered for class {0}")]
    UnknownClass(String),
}

#[derive(Debug, Error)]
#[error("class {class} has no method {method}")]
pub struct MissingMethod {
    pub class: String,
    pub method: String,
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    MissingMethod(#[from] MissingMethod),
    #[error("method invocation failed: {0}")]
    MethodFailed(anyhow::Error),
}

/// A positional-or-named parameter value handed to a dispatch table
/// entry, the result of applying §4.3's arity rules to a [`ParamMap`].
#[derive(Debug, Clone)]
pub enum DispatchArgs {
    None,
    Single(serde_json::Value),
    Positional(Vec<serde_json::Value>),
    Object(ParamMap),
}

/// Computes the dispatch shape for a method declaring `param_count`
/// formal parameters given the caller's parameter map, per §4.3's
/// documented (and intentionally ambiguous-in-one-case) policy.
pub fn resolve_dispatch_args(param_count: usize, params: &ParamMap) -> DispatchArgs {
    match param_count {
        0 => DispatchArgs::None,
        1 if params.len() == 1 => DispatchArgs::Single(params.values().next().cloned().unwrap()),
        1 => DispatchArgs::Object(params.clone()),
        n if params.len() >= n => {
            // ParamMap is insertion-ordered, so this passes the scenario
            // file's declared parameter order positionally.
            DispatchArgs::Positional(params.values().cloned().collect())
        }
        // n >= 2 but params.len() < n: the documented ambiguous case.
        // The original falls through to "pass as object"; preserved here
        // unchanged rather than guessed at.
        _ => DispatchArgs::Object(params.clone()),
    }
}

/// A live, reflectable provider-client instance. Implementors declare
/// their method surface and accept [`DispatchArgs`] built from it.
#[async_trait]
pub trait Invokable: Send + Sync {
    fn methods(&self) -> Vec<&'static str>;

    fn param_count(&self, method: &str) -> Option<usize>;

    fn properties(&self) -> Vec<&'static str> {
        Vec::new()
    }

    async fn invoke(&self, method: &str, args: DispatchArgs) -> Result<serde_json::Value, anyhow::Error>;
}

pub type BuiltInstance = Arc<dyn Invokable>;
pub type FactoryFn = Arc<dyn Fn(&ProviderConfig, &HashMap<String, BuiltInstance>) -> BuiltInstance + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub ws_url: String,
    pub network: String,
}

pub struct ClassFactory {
    pub class_name: String,
    pub dependencies: Vec<String>,
    pub build: FactoryFn,
}

#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, ClassFactory>,
    instances: HashMap<String, BuiltInstance>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: ClassFactory) {
        self.factories.insert(factory.class_name.clone(), factory);
    }

    pub fn clear_instances(&mut self) {
        self.instances.clear();
    }

    pub fn get_instance(
        &mut self,
        class_name: &str,
        config: &ProviderConfig,
    ) -> Result<BuiltInstance, ConfigurationError> {
        let mut in_progress = Vec::new();
        self.get_instance_inner(class_name, config, &mut in_progress)
    }

    fn get_instance_inner(
        &mut self,
        class_name: &str,
        config: &ProviderConfig,
        in_progress: &mut Vec<String>,
    ) -> Result<BuiltInstance, ConfigurationError> {
        if let Some(existing) = self.instances.get(class_name) {
            return Ok(existing.clone());
        }
        if in_progress.contains(&class_name.to_string()) {
            in_progress.push(class_name.to_string());
            return Err(ConfigurationError::CyclicDependency(class_name.to_string(), in_progress.clone()));
        }
        let Some(factory) = self.factories.get(class_name) else {
            return Err(ConfigurationError::UnknownClass(class_name.to_string()));
        };
        let dependencies = factory.dependencies.clone();
        let build = factory.build.clone();

        in_progress.push(class_name.to_string());
        let mut dep_map = HashMap::new();
        for dep in &dependencies {
            let instance = self.get_instance_inner(dep, config, in_progress)?;
            dep_map.insert(dep.clone(), instance);
        }
        in_progress.pop();

        let instance = build(config, &dep_map);
        self.instances.insert(class_name.to_string(), instance.clone());
        Ok(instance)
    }

    pub fn get_class_metadata(&self, class_name: &str) -> Option<(Vec<&'static str>, Vec<&'static str>)> {
        self.instances
            .get(class_name)
            .map(|instance| (instance.methods(), instance.properties()))
    }

    pub async fn invoke_method(
        &mut self,
        class_name: &str,
        method_name: &str,
        params: &ParamMap,
        config: &ProviderConfig,
    ) -> Result<serde_json::Value, InvokeError> {
        let instance = self.get_instance(class_name, config)?;
        let Some(param_count) = instance.param_count(method_name) else {
            return Err(InvokeError::MissingMethod(MissingMethod {
                class: class_name.to_string(),
                method: method_name.to_string(),
            }));
        };
        let args = resolve_dispatch_args(param_count, params);
        instance
            .invoke(method_name, args)
            .await
            .map_err(InvokeError::MethodFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Invokable for Echo {
        fn methods(&self) -> Vec<&'static str> {
            vec!["noArgs", "oneArg", "twoArgs"]
        }

        fn param_count(&self, method: &str) -> Option<usize> {
            match method {
                "noArgs" => Some(0),
                "oneArg" => Some(1),
                "twoArgs" => Some(2),
                _ => None,
            }
        }

        async fn invoke(&self, method: &str, args: DispatchArgs) -> Result<serde_json::Value, anyhow::Error> {
            Ok(serde_json::json!({ "method": method, "args": format!("{args:?}") }))
        }
    }

    fn factory(name: &str, deps: Vec<String>) -> ClassFactory {
        ClassFactory {
            class_name: name.to_string(),
            dependencies: deps,
            build: Arc::new(|_config, _deps| Arc::new(Echo) as BuiltInstance),
        }
    }

    #[test]
    fn get_instance_is_idempotent() {
        let mut registry = Registry::new();
        registry.register(factory("A", vec![]));
        let config = ProviderConfig::default();
        let a1 = registry.get_instance("A", &config).unwrap();
        let a2 = registry.get_instance("A", &config).unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
    }

    #[test]
    fn missing_factory_is_configuration_error() {
        let mut registry = Registry::new();
        let config = ProviderConfig::default();
        assert!(matches!(
            registry.get_instance("Ghost", &config),
            Err(ConfigurationError::UnknownClass(_))
        ));
    }

    #[test]
    fn cyclic_dependency_fails_fast() {
        let mut registry = Registry::new();
        registry.register(factory("A", vec!["B".to_string()]));
        registry.register(factory("B", vec!["A".to_string()]));
        let config = ProviderConfig::default();
        assert!(matches!(
            registry.get_instance("A", &config),
            Err(ConfigurationError::CyclicDependency(_, _))
        ));
    }

    #[tokio::test]
    async fn invoke_missing_method_carries_class_and_method() {
        let mut registry = Registry::new();
        registry.register(factory("A", vec![]));
        let config = ProviderConfig::default();
        let params = ParamMap::new();
        let err = registry.invoke_method("A", "ghostMethod", &params, &config).await.unwrap_err();
        match err {
            InvokeError::MissingMethod(m) => {
                assert_eq!(m.class, "A");
                assert_eq!(m.method, "ghostMethod");
            }
            other => panic!("expected MissingMethod, got {other:?}"),
        }
    }

    #[test]
    fn dispatch_args_zero_params() {
        assert!(matches!(resolve_dispatch_args(0, &ParamMap::new()), DispatchArgs::None));
    }

    #[test]
    fn dispatch_args_single_param_single_entry() {
        let mut params = ParamMap::new();
        params.insert("symbol".into(), serde_json::json!("BTCUSDT"));
        assert!(matches!(resolve_dispatch_args(1, &params), DispatchArgs::Single(_)));
    }

    #[test]
    fn dispatch_args_single_param_multi_entry_passes_object() {
        let mut params = ParamMap::new();
        params.insert("a".into(), serde_json::json!(1));
        params.insert("b".into(), serde_json::json!(2));
        assert!(matches!(resolve_dispatch_args(1, &params), DispatchArgs::Object(_)));
    }

    #[test]
    fn dispatch_args_ambiguous_case_falls_back_to_object() {
        // param_count=2 but only one entry provided: documented ambiguous
        // case, preserved as "pass as object" rather than guessed at.
        let mut params = ParamMap::new();
        params.insert("a".into(), serde_json::json!(1));
        assert!(matches!(resolve_dispatch_args(2, &params), DispatchArgs::Object(_)));
    }
}
