use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use shared_types::Agent;
use uuid::Uuid;

pub async fn get_by_id(conn: &mut AsyncPgConnection, agent_id: Uuid) -> anyhow::Result<Agent> {
    use crate::schema::agents::dsl::*;

    let agent = agents.filter(id.eq(agent_id)).first::<Agent>(conn).await?;

    Ok(agent)
}

pub async fn get_by_email(
    conn: &mut AsyncPgConnection,
    email_val: &str,
) -> anyhow::Result<Option<Agent>> {
    use crate::schema::agents::dsl::*;

    let agent = agents
        .filter(email.eq(email_val.to_lowercase()))
        .first::<Agent>(conn)
        .await
        .optional()?;

    Ok(agent)
}

/// Find the agent for a login, creating it on first sign-in.
///
/// Returns the agent and whether it was newly created.
pub async fn upsert_login(
    conn: &mut AsyncPgConnection,
    email_val: &str,
    name_val: Option<&str>,
    google_id_val: Option<&str>,
) -> anyhow::Result<(Agent, bool)> {
    use crate::schema::agents::dsl::*;

    if let Some(existing) = get_by_email(conn, email_val).await? {
        let updated = diesel::update(agents.filter(id.eq(existing.id)))
            .set((
                name.eq(name_val.or(existing.name.as_deref())),
                google_id.eq(google_id_val.or(existing.google_id.as_deref())),
                updated_at.eq(Utc::now()),
            ))
            .get_result::<Agent>(conn)
            .await?;
        return Ok((updated, false));
    }

    let created = diesel::insert_into(agents)
        .values((
            email.eq(email_val.to_lowercase()),
            name.eq(name_val),
            google_id.eq(google_id_val),
        ))
        .get_result::<Agent>(conn)
        .await?;

    Ok((created, true))
}
