use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared_types::{Client, ClientStatus};
use uuid::Uuid;

use crate::models::{ClientChanges, NewClient};

pub async fn list(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    status_filter: Option<ClientStatus>,
) -> anyhow::Result<Vec<Client>> {
    use crate::schema::clients::dsl::*;

    let mut query = clients
        .filter(agent_id.eq(agent))
        .order_by((last_name.asc(), first_name.asc()))
        .into_boxed();

    if let Some(s) = status_filter {
        query = query.filter(status.eq(s));
    }

    let items = query.load::<Client>(conn).await?;
    Ok(items)
}

pub async fn get(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    client_id: Uuid,
) -> anyhow::Result<Option<Client>> {
    use crate::schema::clients::dsl::*;

    let client = clients
        .filter(id.eq(client_id))
        .filter(agent_id.eq(agent))
        .first::<Client>(conn)
        .await
        .optional()?;

    Ok(client)
}

pub async fn create(conn: &mut AsyncPgConnection, new_client: NewClient) -> anyhow::Result<Client> {
    use crate::schema::clients::dsl::*;

    let client = diesel::insert_into(clients)
        .values(&new_client)
        .get_result::<Client>(conn)
        .await?;

    Ok(client)
}

pub async fn update(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    client_id: Uuid,
    mut changes: ClientChanges,
) -> anyhow::Result<Option<Client>> {
    use crate::schema::clients::dsl::*;

    changes.updated_at = Some(Utc::now());

    let updated = diesel::update(clients.filter(id.eq(client_id)).filter(agent_id.eq(agent)))
        .set(&changes)
        .get_result::<Client>(conn)
        .await
        .optional()?;

    Ok(updated)
}

/// Returns true when a row was deleted.
pub async fn delete(
    conn: &mut AsyncPgConnection,
    agent: Uuid,
    client_id: Uuid,
) -> anyhow::Result<bool> {
    use crate::schema::clients::dsl::*;

    let deleted = diesel::delete(clients.filter(id.eq(client_id)).filter(agent_id.eq(agent)))
        .execute(conn)
        .await?;

    Ok(deleted > 0)
}
