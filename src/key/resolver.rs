//! Cache key resolution from name templates and key expressions

use crate::config::CacheProperties;
use crate::error::{CacheError, Result};
use crate::key::duration::{format_duration, parse_duration};
use crate::key::expression::{CallContext, KeyEvaluator, TemplateEvaluator};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Separator between the static namespace and the evaluated key expression
pub const KEY_SEPARATOR: &str = ":";

/// Separator between a cache name and its TTL suffix (`orders#PT30S`)
pub const TTL_SEPARATOR: char = '#';

/// Suffix of the shared/exclusive lock pair guarding a key
pub const RW_LOCK_SUFFIX: &str = "rw";

/// Suffix of the single-flight mutex guarding a key
pub const SYNC_LOCK_SUFFIX: &str = "sync";

/// A fully resolved cache key with its optional time-to-live
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedKey {
    /// Final key as used against the store, global prefix included
    pub key: String,

    /// Static namespace from the name template, TTL suffix removed
    pub namespace: String,

    /// TTL parsed from the name template, if any
    pub ttl: Option<Duration>,
}

impl ResolvedKey {
    /// Name of a lock scoped to this key, e.g. `user:42:rw`
    pub fn lock_name(&self, suffix: &str) -> String {
        lock_name(&self.key, suffix)
    }
}

/// Name of a lock scoped to a key namespace
pub fn lock_name(namespace: &str, suffix: &str) -> String {
    format!("{}{}{}", namespace, KEY_SEPARATOR, suffix)
}

impl fmt::Display for ResolvedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ttl {
            Some(ttl) => write!(f, "{} (ttl {})", self.key, format_duration(ttl)),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Split `name#<ISO-8601 duration>` into the cache name and its TTL
///
/// A present but malformed suffix is a configuration error. Zero is rejected
/// as well because a store would evict such an entry immediately.
pub fn parse_name_template(template: &str) -> Result<(String, Option<Duration>)> {
    match template.split_once(TTL_SEPARATOR) {
        None => Ok((template.to_string(), None)),
        Some((name, suffix)) => {
            let ttl = parse_duration(suffix).map_err(|e| {
                error!(template = %template, "Malformed TTL suffix in cache name");
                e
            })?;
            if ttl.is_zero() {
                return Err(CacheError::InvalidConfiguration(format!(
                    "TTL in cache name '{}' must be positive",
                    template
                )));
            }
            Ok((name.to_string(), Some(ttl)))
        }
    }
}

/// Resolves cache keys for intercepted calls
///
/// Pure and deterministic: identical templates and arguments always produce
/// the same [`ResolvedKey`].
#[derive(Clone)]
pub struct KeyResolver {
    evaluator: Arc<dyn KeyEvaluator>,
    properties: CacheProperties,
}

impl KeyResolver {
    /// Create a resolver using the default [`TemplateEvaluator`]
    pub fn new(properties: CacheProperties) -> Self {
        Self::with_evaluator(properties, Arc::new(TemplateEvaluator::new()))
    }

    /// Create a resolver with a custom expression evaluator
    pub fn with_evaluator(properties: CacheProperties, evaluator: Arc<dyn KeyEvaluator>) -> Self {
        Self {
            evaluator,
            properties,
        }
    }

    pub fn properties(&self) -> &CacheProperties {
        &self.properties
    }

    /// Resolve the key for one call
    pub fn resolve(
        &self,
        name_template: &str,
        key_expression: &str,
        context: &CallContext,
    ) -> Result<ResolvedKey> {
        let (namespace, ttl) = parse_name_template(name_template)?;

        let dynamic = if key_expression.trim().is_empty() {
            String::new()
        } else {
            self.evaluator.evaluate(key_expression, context)?
        };

        let key = match (namespace.is_empty(), dynamic.is_empty()) {
            (false, false) => format!("{}{}{}", namespace, KEY_SEPARATOR, dynamic),
            (false, true) => namespace.clone(),
            (true, false) => dynamic,
            (true, true) => {
                return Err(CacheError::InvalidConfiguration(
                    "cache name and key expression are both empty".to_string(),
                ))
            }
        };

        let key = self.properties.apply_prefix(&key);
        debug!(key = %key, ttl = ?ttl, "Resolved cache key");

        Ok(ResolvedKey {
            key,
            namespace,
            ttl,
        })
    }
}

impl fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyResolver")
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> KeyResolver {
        KeyResolver::new(CacheProperties::default())
    }

    #[test]
    fn test_namespace_and_expression() {
        let ctx = CallContext::new().with("id", 42);
        let resolved = resolver().resolve("user", "#id", &ctx).unwrap();
        assert_eq!(resolved.key, "user:42");
        assert_eq!(resolved.namespace, "user");
        assert_eq!(resolved.ttl, None);
        assert_eq!(resolved.lock_name(RW_LOCK_SUFFIX), "user:42:rw");
        assert_eq!(resolved.lock_name(SYNC_LOCK_SUFFIX), "user:42:sync");
    }

    #[test]
    fn test_only_one_part() {
        let ctx = CallContext::new().with("id", 7);
        assert_eq!(resolver().resolve("catalog", "", &ctx).unwrap().key, "catalog");
        assert_eq!(resolver().resolve("", "#id", &ctx).unwrap().key, "7");
        assert!(resolver().resolve("", "", &ctx).is_err());
    }

    #[test]
    fn test_ttl_suffix() {
        let ctx = CallContext::new();
        let resolved = resolver().resolve("orders#PT30S", "", &ctx).unwrap();
        assert_eq!(resolved.key, "orders");
        assert_eq!(resolved.ttl, Some(Duration::from_secs(30)));
        assert_eq!(resolved.to_string(), "orders (ttl PT30S)");
    }

    #[test]
    fn test_malformed_ttl_is_configuration_error() {
        let ctx = CallContext::new();
        let err = resolver().resolve("orders#bogus", "", &ctx).unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfiguration(_)));

        let err = resolver().resolve("orders#PT0S", "", &ctx).unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_key_evaluation_error_surfaces() {
        let err = resolver()
            .resolve("user", "#id", &CallContext::new())
            .unwrap_err();
        assert!(matches!(err, CacheError::KeyEvaluation { .. }));
    }

    #[test]
    fn test_global_prefix() {
        let properties = CacheProperties::builder()
            .use_key_prefix(true)
            .key_prefix("app1::")
            .build();
        let resolver = KeyResolver::new(properties);
        let ctx = CallContext::new().with("id", 42);

        let resolved = resolver.resolve("user#PT1M", "#id", &ctx).unwrap();
        assert_eq!(resolved.key, "app1::user:42");
        assert_eq!(resolved.namespace, "user");
        assert_eq!(resolved.lock_name(RW_LOCK_SUFFIX), "app1::user:42:rw");
    }

    #[test]
    fn test_deterministic() {
        let ctx = CallContext::new().with("id", 42).with("region", "eu");
        let first = resolver().resolve("user#PT5M", "#region + '-' + #id", &ctx).unwrap();
        let second = resolver().resolve("user#PT5M", "#region + '-' + #id", &ctx).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.key, "user:eu-42");
    }

    #[test]
    fn test_oversized_ttl_suffix_is_configuration_error() {
        let ctx = CallContext::new();
        for template in ["orders#PT99999999999999999999999999999H", "orders#P9999999999999999999999999D"] {
            assert!(matches!(
                resolver().resolve(template, "", &ctx),
                Err(CacheError::InvalidConfiguration(_))
            ));
        }
    }
}
