//! Conflict resolution between local and server copies of a record.

use crate::models::Record;

/// Policy deciding which copy of a record survives a merge.
pub trait ConflictResolver: Send + Sync {
    /// Short policy name used in logs and `resolve_conflicts` responses.
    fn name(&self) -> &'static str;

    /// Produce the record to store, given the local copy (if any) and the
    /// incoming server copy.
    fn resolve(&self, local: Option<&Record>, server: Record) -> Record;
}

/// The server's copy always replaces the local one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerWins;

impl ConflictResolver for ServerWins {
    fn name(&self) -> &'static str {
        "server_wins"
    }

    fn resolve(&self, local: Option<&Record>, server: Record) -> Record {
        if let Some(local) = local {
            if local.payload != server.payload {
                tracing::debug!(
                    collection = %server.collection,
                    id = %server.id,
                    local_synced = local.synced,
                    "server copy replaces local record"
                );
            }
        }
        Record {
            synced: true,
            ..server
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Collection;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn server_copy_wins_and_is_synced() {
        let local = Record::local(
            Collection::Notifications,
            "n1",
            json!({"id": "n1", "read": true}),
        );
        let mut server = Record::from_server(
            Collection::Notifications,
            json!({"id": "n1", "read": false, "updatedAt": "2026-03-01T00:00:00Z"}),
        )
        .unwrap();
        server.synced = false;

        let resolved = ServerWins.resolve(Some(&local), server.clone());
        assert_eq!(resolved.payload, server.payload);
        assert_eq!(resolved.last_server_version, server.last_server_version);
        assert!(resolved.synced);
    }

    #[test]
    fn resolves_without_local_copy() {
        let server =
            Record::from_server(Collection::Stores, json!({"id": "s1", "name": "Cafe"})).unwrap();
        let resolved = ServerWins.resolve(None, server.clone());
        assert_eq!(resolved, server);
        assert_eq!(ServerWins.name(), "server_wins");
    }
}
