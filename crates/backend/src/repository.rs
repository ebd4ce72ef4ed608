//! Repository trait for agent-owned entities.
//!
//! Every operation takes the owning agent's id; "not found" and "owned by
//! someone else" are the same answer (`None` / `false`).

use anyhow::Result;
use diesel_async::AsyncPgConnection;
use uuid::Uuid;

use crate::models::{ClientChanges, NewClient};

/// CRUD over rows that belong to one agent.
///
/// # Type Parameters
/// - `Entity`: The domain type returned from queries
/// - `Filter`: Optional narrowing applied by `list`
/// - `CreateInput`: Input type for creating new entities
/// - `UpdateInput`: Input type for updating existing entities
#[allow(async_fn_in_trait)]
pub trait AgentRepository {
    type Entity;
    type Filter;
    type CreateInput;
    type UpdateInput;

    async fn list(
        conn: &mut AsyncPgConnection,
        agent: Uuid,
        filter: Self::Filter,
    ) -> Result<Vec<Self::Entity>>;

    async fn get(conn: &mut AsyncPgConnection, agent: Uuid, id: Uuid) -> Result<Option<Self::Entity>>;

    async fn create(
        conn: &mut AsyncPgConnection,
        agent: Uuid,
        input: Self::CreateInput,
    ) -> Result<Self::Entity>;

    async fn update(
        conn: &mut AsyncPgConnection,
        agent: Uuid,
        id: Uuid,
        input: Self::UpdateInput,
    ) -> Result<Option<Self::Entity>>;

    /// Returns true when a row was deleted.
    async fn delete(conn: &mut AsyncPgConnection, agent: Uuid, id: Uuid) -> Result<bool>;
}

/// Clients repository implementation
pub struct Clients;

impl AgentRepository for Clients {
    type Entity = shared_types::Client;
    type Filter = Option<shared_types::ClientStatus>;
    type CreateInput = shared_types::CreateClientRequest;
    type UpdateInput = shared_types::UpdateClientRequest;

    async fn list(
        conn: &mut AsyncPgConnection,
        agent: Uuid,
        filter: Self::Filter,
    ) -> Result<Vec<Self::Entity>> {
        crate::db::clients::list(conn, agent, filter).await
    }

    async fn get(conn: &mut AsyncPgConnection, agent: Uuid, id: Uuid) -> Result<Option<Self::Entity>> {
        crate::db::clients::get(conn, agent, id).await
    }

    async fn create(
        conn: &mut AsyncPgConnection,
        agent: Uuid,
        input: Self::CreateInput,
    ) -> Result<Self::Entity> {
        crate::db::clients::create(conn, new_client(agent, input)).await
    }

    async fn update(
        conn: &mut AsyncPgConnection,
        agent: Uuid,
        id: Uuid,
        input: Self::UpdateInput,
    ) -> Result<Option<Self::Entity>> {
        crate::db::clients::update(conn, agent, id, client_changes(input)).await
    }

    async fn delete(conn: &mut AsyncPgConnection, agent: Uuid, id: Uuid) -> Result<bool> {
        crate::db::clients::delete(conn, agent, id).await
    }
}

fn new_client(agent: Uuid, input: shared_types::CreateClientRequest) -> NewClient {
    NewClient {
        agent_id: agent,
        first_name: input.first_name.trim().to_string(),
        last_name: input.last_name.trim().to_string(),
        email: input.email.map(|e| e.trim().to_lowercase()),
        phone: input.phone,
        status: input.status.unwrap_or(shared_types::ClientStatus::Lead),
        notes: input.notes,
    }
}

fn client_changes(input: shared_types::UpdateClientRequest) -> ClientChanges {
    ClientChanges {
        first_name: input.first_name.map(|s| s.trim().to_string()),
        last_name: input.last_name.map(|s| s.trim().to_string()),
        email: input.email.map(|e| e.trim().to_lowercase()),
        phone: input.phone,
        status: input.status,
        notes: input.notes,
        updated_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{ClientStatus, CreateClientRequest, UpdateClientRequest};

    // Verify Clients implements AgentRepository
    fn _check_clients_impl() {
        fn _check<T: AgentRepository>() {}
        _check::<Clients>();
    }

    #[test]
    fn test_new_client_defaults_to_lead() {
        let agent = Uuid::new_v4();
        let row = new_client(
            agent,
            CreateClientRequest {
                first_name: " Jane ".to_string(),
                last_name: "Doe".to_string(),
                email: Some("Jane.Doe@Example.com".to_string()),
                phone: None,
                status: None,
                notes: None,
            },
        );

        assert_eq!(row.agent_id, agent);
        assert_eq!(row.first_name, "Jane");
        assert_eq!(row.email.as_deref(), Some("jane.doe@example.com"));
        assert_eq!(row.status, ClientStatus::Lead);
    }

    #[test]
    fn test_client_changes_only_touch_given_fields() {
        let changes = client_changes(UpdateClientRequest {
            status: Some(ClientStatus::Active),
            ..Default::default()
        });

        assert_eq!(changes.status, Some(ClientStatus::Active));
        assert!(changes.first_name.is_none());
        assert!(changes.email.is_none());
    }
}
