//! Face gallery
//!
//! Enrolled reference embeddings, persisted in the `face_profiles` table as
//! little-endian f32 blobs. The matcher reads them through [`FaceGallery::candidates`].

use crate::matcher::{encode_embedding, Candidate};
use sqlx::{Row, SqlitePool};
use tracing::info;
use vigil_common::db::format_timestamp;
use vigil_common::{time, Error, Result};

/// Persistent store of enrolled face embeddings
#[derive(Clone)]
pub struct FaceGallery {
    pool: SqlitePool,
}

/// Gallery row without its embedding bytes
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ProfileSummary {
    pub profile_id: i64,
    pub identity_id: String,
    pub dimensions: i64,
}

fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        return Err(Error::InvalidInput("embedding must not be empty".into()));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(Error::InvalidInput(
            "embedding must contain only finite values".into(),
        ));
    }
    if embedding.iter().all(|v| *v == 0.0) {
        return Err(Error::InvalidInput("embedding must have non-zero norm".into()));
    }
    Ok(())
}

impl FaceGallery {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Enroll a new profile for `identity_id`, returning its profile id
    pub async fn enroll(&self, identity_id: &str, embedding: &[f32]) -> Result<i64> {
        let identity_id = identity_id.trim();
        if identity_id.is_empty() {
            return Err(Error::InvalidInput("identity_id must not be blank".into()));
        }
        validate_embedding(embedding)?;

        let now = format_timestamp(&time::now());
        let result = sqlx::query(
            r#"
            INSERT INTO face_profiles (identity_id, embedding, dimensions, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(identity_id)
        .bind(encode_embedding(embedding))
        .bind(embedding.len() as i64)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let profile_id = result.last_insert_rowid();
        info!(profile_id, identity_id, dimensions = embedding.len(), "Enrolled face profile");
        Ok(profile_id)
    }

    /// Replace the embedding of an existing profile
    pub async fn update(&self, profile_id: i64, embedding: &[f32]) -> Result<()> {
        validate_embedding(embedding)?;

        let result = sqlx::query(
            "UPDATE face_profiles SET embedding = ?, dimensions = ?, updated_at = ? WHERE profile_id = ?",
        )
        .bind(encode_embedding(embedding))
        .bind(embedding.len() as i64)
        .bind(format_timestamp(&time::now()))
        .bind(profile_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("face profile {}", profile_id)));
        }
        Ok(())
    }

    /// Delete a profile
    pub async fn remove(&self, profile_id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM face_profiles WHERE profile_id = ?")
            .bind(profile_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("face profile {}", profile_id)));
        }
        info!(profile_id, "Removed face profile");
        Ok(())
    }

    /// All enrolled embeddings, ascending by profile id
    pub async fn candidates(&self) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            "SELECT profile_id, identity_id, embedding FROM face_profiles ORDER BY profile_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(Candidate {
                    profile_id: row.try_get("profile_id")?,
                    identity_id: row.try_get("identity_id")?,
                    embedding: row.try_get("embedding")?,
                })
            })
            .collect()
    }

    /// Profiles without embedding bytes, ascending by profile id
    pub async fn profiles(&self) -> Result<Vec<ProfileSummary>> {
        let rows = sqlx::query(
            "SELECT profile_id, identity_id, dimensions FROM face_profiles ORDER BY profile_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ProfileSummary {
                    profile_id: row.try_get("profile_id")?,
                    identity_id: row.try_get("identity_id")?,
                    dimensions: row.try_get("dimensions")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::SimilarityMatcher;
    use vigil_common::db::{create_schema, init_memory_database};

    async fn gallery() -> FaceGallery {
        let pool = init_memory_database().await.unwrap();
        create_schema(&pool).await.unwrap();
        FaceGallery::new(pool)
    }

    #[tokio::test]
    async fn test_enroll_and_match() {
        let gallery = gallery().await;
        let alice = gallery.enroll("alice", &[1.0, 0.0, 0.0]).await.unwrap();
        let bob = gallery.enroll("bob", &[0.0, 1.0, 0.0]).await.unwrap();
        assert!(bob > alice);

        let candidates = gallery.candidates().await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].profile_id, alice);

        let result = SimilarityMatcher::new(0.6).match_probe(&[0.1, 0.9, 0.0], &candidates, None);
        assert_eq!(result.identity_id.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let gallery = gallery().await;
        let id = gallery.enroll("alice", &[1.0, 0.0]).await.unwrap();

        gallery.update(id, &[0.0, 1.0, 0.0]).await.unwrap();
        let profiles = gallery.profiles().await.unwrap();
        assert_eq!(profiles[0].dimensions, 3);

        gallery.remove(id).await.unwrap();
        assert!(gallery.candidates().await.unwrap().is_empty());
        assert!(matches!(gallery.remove(id).await, Err(Error::NotFound(_))));
        assert!(matches!(gallery.update(id, &[1.0]).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_bad_embeddings() {
        let gallery = gallery().await;
        assert!(matches!(gallery.enroll("a", &[]).await, Err(Error::InvalidInput(_))));
        assert!(matches!(gallery.enroll("a", &[0.0, 0.0]).await, Err(Error::InvalidInput(_))));
        assert!(matches!(
            gallery.enroll("a", &[1.0, f32::INFINITY]).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(gallery.enroll("  ", &[1.0]).await, Err(Error::InvalidInput(_))));
    }
}
