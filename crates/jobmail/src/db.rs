use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager, ManagerConfig},
    AsyncPgConnection, RunQueryDsl,
};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{CheckpointRow, EmailRecordRow, NewEmailRecord};

pub type DbPool = Pool<AsyncPgConnection>;

async fn establish_tls_connection(config: String) -> diesel::ConnectionResult<AsyncPgConnection> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

    let (client, connection) = tokio_postgres::connect(&config, tls)
        .await
        .map_err(|e| diesel::ConnectionError::BadConnection(e.to_string()))?;

    // The connection future drives the socket; it ends when the client is dropped
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Postgres connection error: {}", e);
        }
    });

    AsyncPgConnection::try_from(client).await
}

pub fn establish_connection_pool(config: &DatabaseConfig) -> anyhow::Result<DbPool> {
    let manager = if config.tls {
        let mut manager_config = ManagerConfig::default();
        manager_config.custom_setup =
            Box::new(|url| Box::pin(establish_tls_connection(url.to_string())));
        AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
            config.url.clone(),
            manager_config,
        )
    } else {
        AsyncDieselConnectionManager::<AsyncPgConnection>::new(config.url.clone())
    };

    let pool = Pool::builder(manager).build()?;
    Ok(pool)
}

// Email record database operations
pub mod email_records {
    use super::*;

    pub async fn get_by_message_id(
        conn: &mut AsyncPgConnection,
        msg_id: &str,
    ) -> QueryResult<Option<EmailRecordRow>> {
        use crate::schema::email_records::dsl::*;

        email_records
            .filter(message_id.eq(msg_id))
            .select(EmailRecordRow::as_select())
            .first(conn)
            .await
            .optional()
    }

    /// Insert, or overwrite every mutable column of the existing row with the
    /// same message id. Returns the stored id.
    pub async fn upsert(conn: &mut AsyncPgConnection, record: &NewEmailRecord) -> QueryResult<Uuid> {
        use crate::schema::email_records::dsl::*;

        diesel::insert_into(email_records)
            .values(record)
            .on_conflict(message_id)
            .do_update()
            .set(&record.values)
            .returning(id)
            .get_result::<Uuid>(conn)
            .await
    }

    pub async fn set_unread(
        conn: &mut AsyncPgConnection,
        msg_id: &str,
        unread: bool,
    ) -> QueryResult<usize> {
        use crate::schema::email_records::dsl::*;

        diesel::update(email_records.filter(message_id.eq(msg_id)))
            .set((is_unread.eq(unread), updated_at.eq(Utc::now())))
            .execute(conn)
            .await
    }

    pub async fn delete_by_message_id(
        conn: &mut AsyncPgConnection,
        msg_id: &str,
    ) -> QueryResult<usize> {
        use crate::schema::email_records::dsl::*;

        diesel::delete(email_records.filter(message_id.eq(msg_id)))
            .execute(conn)
            .await
    }

    pub async fn list_received_since(
        conn: &mut AsyncPgConnection,
        since: DateTime<Utc>,
        limit: i64,
    ) -> QueryResult<Vec<EmailRecordRow>> {
        use crate::schema::email_records::dsl::*;

        email_records
            .filter(received_at.ge(since))
            .order_by((received_at.desc(), message_id.asc()))
            .limit(limit)
            .select(EmailRecordRow::as_select())
            .load(conn)
            .await
    }

    pub async fn list_by_thread(
        conn: &mut AsyncPgConnection,
        thread: &str,
    ) -> QueryResult<Vec<EmailRecordRow>> {
        use crate::schema::email_records::dsl::*;

        email_records
            .filter(thread_id.eq(thread))
            .order_by((received_at.asc(), message_id.asc()))
            .select(EmailRecordRow::as_select())
            .load(conn)
            .await
    }

    pub async fn count_by_mailbox(conn: &mut AsyncPgConnection, owner: &str) -> QueryResult<i64> {
        use crate::schema::email_records::dsl::*;

        email_records
            .filter(mailbox.eq(owner))
            .count()
            .get_result(conn)
            .await
    }
}

// Sync checkpoint database operations
pub mod sync_checkpoints {
    use super::*;

    pub async fn get(conn: &mut AsyncPgConnection, owner: &str) -> QueryResult<Option<CheckpointRow>> {
        use crate::schema::sync_checkpoints::dsl::*;

        sync_checkpoints
            .filter(mailbox.eq(owner))
            .select(CheckpointRow::as_select())
            .first(conn)
            .await
            .optional()
    }

    pub async fn upsert(conn: &mut AsyncPgConnection, row: &CheckpointRow) -> QueryResult<()> {
        use crate::schema::sync_checkpoints::dsl::*;

        diesel::insert_into(sync_checkpoints)
            .values(row)
            .on_conflict(mailbox)
            .do_update()
            .set(row)
            .execute(conn)
            .await?;

        Ok(())
    }
}
