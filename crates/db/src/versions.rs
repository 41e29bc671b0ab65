// crates/db/src/versions.rs
// Version store: immutable content snapshots keyed by (file_id, pass_number).

use chrono::{DateTime, Utc};
use sqlx::Row;

use redraft_types::Version;

use crate::{Database, DbError, DbResult};

fn timestamp(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

impl Database {
    /// Write a snapshot for (`file_id`, `pass_number`).
    ///
    /// Snapshots are write-once: a second put for the same key is a
    /// conflict, never a silent overwrite. Callers that must supersede a
    /// snapshot use [`Database::replace_version`], which keeps an audit
    /// copy of the old content.
    pub async fn put_version(
        &self,
        file_id: &str,
        pass_number: u32,
        content: &str,
    ) -> DbResult<Version> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO versions (file_id, pass_number, content, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(file_id)
        .bind(pass_number as i64)
        .bind(content)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| {
            DbError::from_unique_violation(
                e,
                &format!("snapshot already exists for {file_id} pass {pass_number}"),
            )
        })?;

        Ok(Version {
            file_id: file_id.to_string(),
            pass_number,
            content: content.to_string(),
            created_at: timestamp(now),
        })
    }

    /// Fetch the snapshot for (`file_id`, `pass_number`).
    pub async fn get_version(&self, file_id: &str, pass_number: u32) -> DbResult<Version> {
        let row = sqlx::query(
            "SELECT file_id, pass_number, content, created_at FROM versions \
             WHERE file_id = ?1 AND pass_number = ?2",
        )
        .bind(file_id)
        .bind(pass_number as i64)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| DbError::not_found("version", format!("{file_id}@{pass_number}")))?;

        Ok(Version {
            file_id: row.get("file_id"),
            pass_number: row.get::<i64, _>("pass_number") as u32,
            content: row.get("content"),
            created_at: timestamp(row.get("created_at")),
        })
    }

    /// Recorded pass numbers for a file, ascending.
    pub async fn list_passes(&self, file_id: &str) -> DbResult<Vec<u32>> {
        let rows = sqlx::query(
            "SELECT pass_number FROM versions WHERE file_id = ?1 ORDER BY pass_number ASC",
        )
        .bind(file_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .iter()
            .map(|r| r.get::<i64, _>("pass_number") as u32)
            .collect())
    }

    /// Explicitly supersede an existing snapshot.
    ///
    /// The prior content is copied into `version_audit` before the row is
    /// rewritten, in the same transaction. Fails if no snapshot exists.
    pub async fn replace_version(
        &self,
        file_id: &str,
        pass_number: u32,
        content: &str,
    ) -> DbResult<Version> {
        let mut tx = self.pool().begin().await?;
        let now = Utc::now().timestamp_millis();

        let moved = sqlx::query(
            "INSERT INTO version_audit (file_id, pass_number, content, created_at, replaced_at) \
             SELECT file_id, pass_number, content, created_at, ?3 FROM versions \
             WHERE file_id = ?1 AND pass_number = ?2",
        )
        .bind(file_id)
        .bind(pass_number as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if moved.rows_affected() == 0 {
            return Err(DbError::not_found(
                "version",
                format!("{file_id}@{pass_number}"),
            ));
        }

        sqlx::query(
            "UPDATE versions SET content = ?3, created_at = ?4 \
             WHERE file_id = ?1 AND pass_number = ?2",
        )
        .bind(file_id)
        .bind(pass_number as i64)
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Version {
            file_id: file_id.to_string(),
            pass_number,
            content: content.to_string(),
            created_at: timestamp(now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get_version() {
        let db = Database::new_in_memory().await.unwrap();
        db.put_version("f1", 0, "original").await.unwrap();
        let v = db.get_version("f1", 0).await.unwrap();
        assert_eq!(v.content, "original");
        assert_eq!(v.pass_number, 0);
    }

    #[tokio::test]
    async fn test_duplicate_put_is_conflict() {
        let db = Database::new_in_memory().await.unwrap();
        db.put_version("f1", 1, "first").await.unwrap();
        let err = db.put_version("f1", 1, "second").await.unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
        // Original content untouched.
        assert_eq!(db.get_version("f1", 1).await.unwrap().content, "first");
    }

    #[tokio::test]
    async fn test_get_missing_version() {
        let db = Database::new_in_memory().await.unwrap();
        let err = db.get_version("f1", 9).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_passes_ordered() {
        let db = Database::new_in_memory().await.unwrap();
        db.put_version("f1", 2, "b").await.unwrap();
        db.put_version("f1", 0, "o").await.unwrap();
        db.put_version("f1", 1, "a").await.unwrap();
        db.put_version("other", 0, "x").await.unwrap();
        assert_eq!(db.list_passes("f1").await.unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_replace_version_keeps_audit_copy() {
        let db = Database::new_in_memory().await.unwrap();
        db.put_version("f1", 1, "first").await.unwrap();
        db.replace_version("f1", 1, "second").await.unwrap();
        assert_eq!(db.get_version("f1", 1).await.unwrap().content, "second");

        let audited: (String,) =
            sqlx::query_as("SELECT content FROM version_audit WHERE file_id = 'f1'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(audited.0, "first");
    }

    #[tokio::test]
    async fn test_replace_missing_version_fails() {
        let db = Database::new_in_memory().await.unwrap();
        let err = db.replace_version("f1", 1, "content").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
