//! Qualified-name resolution.
//!
//! A qualified name is `<serverId>__<itemName>`. Server ids may themselves
//! contain `__`, so resolution matches against the live set of registered ids
//! and picks the longest one that prefixes the name. Only when nothing
//! matches does it fall back to splitting at the first separator.

use std::sync::Arc;

use crate::error::CoreError;
use crate::model::SEPARATOR;
use crate::store::DataStore;

/// A resolved `(server_id, item_name)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub server_id: String,
    pub item_name: String,
}

/// Resolve `name` against `registered` server ids.
pub fn resolve_qualified_name<'a, I>(name: &str, registered: I) -> Result<QualifiedName, CoreError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidates: Vec<&str> = registered
        .into_iter()
        .filter(|id| !id.is_empty())
        .filter(|id| {
            name.len() > id.len() && name.starts_with(id) && name[id.len()..].starts_with(SEPARATOR)
        })
        .collect();
    // Longest first, then lexicographic so equal lengths resolve the same way every time.
    candidates.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    if let Some(server_id) = candidates.first() {
        let item_name = &name[server_id.len() + SEPARATOR.len()..];
        if item_name.is_empty() {
            return Err(CoreError::invalid_name(name));
        }
        return Ok(QualifiedName {
            server_id: server_id.to_string(),
            item_name: item_name.to_string(),
        });
    }

    match name.find(SEPARATOR) {
        Some(idx) if idx > 0 && idx + SEPARATOR.len() < name.len() => Ok(QualifiedName {
            server_id: name[..idx].to_string(),
            item_name: name[idx + SEPARATOR.len()..].to_string(),
        }),
        _ => Err(CoreError::invalid_name(name)),
    }
}

/// Resolves names against the servers currently in the store.
#[derive(Clone)]
pub struct QualifiedNameResolver {
    store: Arc<dyn DataStore>,
}

impl QualifiedNameResolver {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, name: &str) -> Result<QualifiedName, CoreError> {
        let servers = self.store.get_all_servers().await?;
        resolve_qualified_name(name, servers.iter().map(|s| s.id.as_str()))
    }
}
