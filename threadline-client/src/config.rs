use anyhow::Context;

use crate::api::StoreLayout;

pub const ENV_LOOKUP_CONCURRENCY: &str = "THREADLINE_LOOKUP_CONCURRENCY";
pub const ENV_LAYOUT: &str = "THREADLINE_LAYOUT";

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of like lookups in flight at once
    pub lookup_concurrency: usize,

    pub layout: StoreLayout,
}

impl Default for SyncConfig {
    fn default() -> SyncConfig {
        SyncConfig {
            lookup_concurrency: 16,
            layout: StoreLayout::default(),
        }
    }
}

impl SyncConfig {
    /// Defaults, overridden by the `THREADLINE_*` environment variables that are set
    pub fn from_env() -> anyhow::Result<SyncConfig> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<SyncConfig> {
        let mut config = SyncConfig::default();
        if let Some(n) = var(ENV_LOOKUP_CONCURRENCY) {
            config.lookup_concurrency = n
                .parse()
                .with_context(|| format!("parsing {ENV_LOOKUP_CONCURRENCY}={n:?} as an integer"))?;
            anyhow::ensure!(
                config.lookup_concurrency > 0,
                "{ENV_LOOKUP_CONCURRENCY} must be at least 1"
            );
        }
        if let Some(layout) = var(ENV_LAYOUT) {
            let fields: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&layout)
                .with_context(|| format!("parsing {ENV_LAYOUT} as a json object"))?;
            config.layout = serde_json::from_value(serde_json::Value::Object(fields))
                .with_context(|| format!("parsing {ENV_LAYOUT} as a json store layout"))?;
            let StoreLayout {
                posts,
                comments,
                replies,
                likes,
            } = &config.layout;
            for name in [posts, comments, replies, likes] {
                anyhow::ensure!(
                    !name.is_empty() && !name.contains('/'),
                    "{ENV_LAYOUT} collection name {name:?} must be non-empty and contain no '/'"
                );
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(v: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let v = v
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| v.get(name).cloned()
    }

    #[test]
    fn defaults_without_env() {
        assert_eq!(
            SyncConfig::from_vars(vars(&[])).expect("loading config"),
            SyncConfig::default()
        );
    }

    #[test]
    fn partial_layout_keeps_other_defaults() {
        let config = SyncConfig::from_vars(vars(&[
            (ENV_LOOKUP_CONCURRENCY, "4"),
            (ENV_LAYOUT, r#"{"posts": "articles"}"#),
        ]))
        .expect("loading config");
        assert_eq!(config.lookup_concurrency, 4);
        assert_eq!(config.layout.posts, "articles");
        assert_eq!(config.layout.replies, "replies");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(SyncConfig::from_vars(vars(&[(ENV_LOOKUP_CONCURRENCY, "many")])).is_err());
        assert!(SyncConfig::from_vars(vars(&[(ENV_LOOKUP_CONCURRENCY, "0")])).is_err());
        assert!(SyncConfig::from_vars(vars(&[(ENV_LAYOUT, "[]")])).is_err());
        assert!(SyncConfig::from_vars(vars(&[(ENV_LAYOUT, r#"{"posts": ""}"#)])).is_err());
        assert!(SyncConfig::from_vars(vars(&[(ENV_LAYOUT, r#"{"likes": "a/b"}"#)])).is_err());
    }
}
