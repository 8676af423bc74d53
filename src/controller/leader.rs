//! Writes only the leader unit performs
//!
//! The cluster-wide record lives in the peer application bag, which only the
//! leader may write. Non-leaders read it and wait.

use tracing::{debug, info};

use crate::controller::credentials::{PASSWORD_LENGTH, generate_password};
use crate::controller::error::Result;
use crate::state::cluster::ClusterState;
use crate::state::models::INTERNAL_USERS;
use crate::state::relation::{BagChanges, RelationDataStore, pending_changes};

/// Changes the leader wants in the peer application bag
pub fn cluster_record_changes(state: &ClusterState) -> BagChanges {
    let mut changes = BagChanges::new();

    for user in INTERNAL_USERS {
        if !state.cluster.internal_user_credentials.contains_key(user) {
            info!(user, "Generating credentials for internal user");
            changes.insert(
                format!("{}-password", user),
                Some(generate_password(PASSWORD_LENGTH)),
            );
        }
    }

    for client in &state.clients {
        if client.password.is_none() {
            info!(
                client = %client.app_name,
                username = %client.username(),
                "Generating client password"
            );
            changes.insert(client.username(), Some(generate_password(PASSWORD_LENGTH)));
        }
    }

    // Passwords of departed clients
    for username in state.cluster.client_passwords.keys() {
        let related = state
            .client_relations
            .iter()
            .any(|rel| format!("relation-{}", rel.id) == *username);
        if !related {
            info!(username = %username, "Removing password of departed client");
            changes.insert(username.clone(), None);
        }
    }

    let tls = if state.certificates_relation.is_some() {
        "enabled"
    } else {
        "disabled"
    };
    changes.insert("tls".to_string(), Some(tls.to_string()));

    changes
}

/// Bring the cluster record in line with the relations; returns whether it changed
pub async fn reconcile_cluster_record(
    store: &dyn RelationDataStore,
    state: &ClusterState,
) -> Result<bool> {
    let Some(peer) = &state.peer_relation else {
        return Ok(false);
    };

    let app = &state.identity.app_name;
    let changes = pending_changes(&peer.bag(app), cluster_record_changes(state));
    if changes.is_empty() {
        return Ok(false);
    }

    debug!(keys = ?changes.keys().collect::<Vec<_>>(), "Updating cluster record");
    store.update(peer.id, app, changes).await?;
    Ok(true)
}

/// Publish connection data to every client that has been given a password
///
/// Returns the number of client relations written to.
pub async fn publish_client_data(
    store: &dyn RelationDataStore,
    state: &ClusterState,
) -> Result<usize> {
    let app = &state.identity.app_name;
    let tls = state.cluster.tls_enabled;
    let endpoints = state.bootstrap_server();
    let zookeeper_uris = state
        .zookeeper
        .as_ref()
        .and_then(|zk| zk.connect_string());
    let mut updated = 0;

    for client in &state.clients {
        let Some(password) = &client.password else {
            debug!(
                client = %client.app_name,
                "Skipping update, user has not yet been added"
            );
            continue;
        };
        let Some(relation) = state
            .client_relations
            .iter()
            .find(|rel| rel.id == client.relation_id)
        else {
            continue;
        };

        let desired = BagChanges::from([
            ("endpoints".to_string(), Some(endpoints.clone())),
            ("zookeeper-uris".to_string(), zookeeper_uris.clone()),
            (
                "consumer-group-prefix".to_string(),
                Some(client.consumer_group_prefix()).filter(|p| !p.is_empty()),
            ),
            ("topic".to_string(), client.topic.clone()),
            ("username".to_string(), Some(client.username())),
            ("password".to_string(), Some(password.clone())),
            (
                "tls".to_string(),
                Some(if tls { "enabled" } else { "disabled" }.to_string()),
            ),
            (
                "tls-ca".to_string(),
                if tls {
                    state.unit_broker.ca.clone()
                } else {
                    Some("disabled".to_string())
                },
            ),
        ]);

        let changes = pending_changes(&relation.bag(app), desired);
        if changes.is_empty() {
            continue;
        }

        store.update(relation.id, app, changes).await?;
        info!(
            client = %client.app_name,
            relation_id = relation.id,
            "Published client connection data"
        );
        updated += 1;
    }

    Ok(updated)
}
