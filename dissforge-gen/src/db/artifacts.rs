//! Persisted stage artifacts
//!
//! Rows are insert-only: an artifact is immutable, so a second insert of the
//! same fingerprint is ignored rather than overwriting the first.

use super::retry::retry_on_lock;
use crate::pipeline::{ArtifactPayload, StageArtifact, StageKind};
use chrono::{DateTime, SecondsFormat, Utc};
use dissforge_common::{Error, Fingerprint, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Artifact table access
#[derive(Clone)]
pub struct ArtifactDb {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl ArtifactDb {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert an artifact; an existing row with the same fingerprint wins
    pub async fn save(&self, artifact: &StageArtifact) -> Result<()> {
        // Serialize before touching the database
        let fingerprint = artifact.fingerprint.to_hex();
        let stage = artifact.stage.label();
        let payload = serde_json::to_string(&artifact.payload)
            .map_err(|e| Error::Internal(format!("Failed to serialize payload: {}", e)))?;
        let upstream: Vec<String> = artifact.upstream.iter().map(Fingerprint::to_hex).collect();
        let upstream = serde_json::to_string(&upstream)
            .map_err(|e| Error::Internal(format!("Failed to serialize upstream: {}", e)))?;
        let produced_at = timestamp(&artifact.produced_at);
        let payload_bytes = payload.len() as i64;

        retry_on_lock("save_artifact", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO stage_artifacts (
                    fingerprint, stage, payload, upstream, produced_at, payload_bytes
                ) VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(fingerprint) DO NOTHING
                "#,
            )
            .bind(&fingerprint)
            .bind(stage)
            .bind(&payload)
            .bind(&upstream)
            .bind(&produced_at)
            .bind(payload_bytes)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
            Ok(())
        })
        .await?;

        debug!(stage, fingerprint = %artifact.fingerprint.short(), payload_bytes, "Artifact persisted");
        Ok(())
    }

    /// Load an artifact by fingerprint
    pub async fn load(&self, fingerprint: &Fingerprint) -> Result<Option<StageArtifact>> {
        let row = sqlx::query(
            r#"
            SELECT stage, payload, upstream, produced_at
            FROM stage_artifacts
            WHERE fingerprint = ?
            "#,
        )
        .bind(fingerprint.to_hex())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let stage: String = row.get("stage");
        let stage = StageKind::from_label(&stage)
            .ok_or_else(|| Error::Internal(format!("Unknown stage '{}' in database", stage)))?;

        let payload: String = row.get("payload");
        let payload: ArtifactPayload = serde_json::from_str(&payload)
            .map_err(|e| Error::Internal(format!("Failed to deserialize payload: {}", e)))?;

        let upstream: String = row.get("upstream");
        let upstream: Vec<String> = serde_json::from_str(&upstream)
            .map_err(|e| Error::Internal(format!("Failed to deserialize upstream: {}", e)))?;
        let upstream = upstream
            .iter()
            .map(|hex| hex.parse::<Fingerprint>())
            .collect::<std::result::Result<BTreeSet<_>, _>>()
            .map_err(|e| Error::Internal(format!("Bad upstream fingerprint: {}", e)))?;

        let produced_at: String = row.get("produced_at");
        let produced_at = DateTime::parse_from_rfc3339(&produced_at)
            .map_err(|e| Error::Internal(format!("Failed to parse produced_at: {}", e)))?
            .with_timezone(&Utc);

        Ok(Some(StageArtifact {
            stage,
            fingerprint: *fingerprint,
            payload,
            produced_at,
            upstream,
        }))
    }

    /// Delete rows produced more than `max_age` ago, returning how many went
    pub async fn prune(&self, max_age: Duration) -> Result<u64> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| Error::InvalidInput(format!("max_age out of range: {}", e)))?;
        let cutoff = timestamp(&(Utc::now() - max_age));

        let deleted = retry_on_lock("prune_artifacts", self.max_lock_wait_ms, || async {
            let result = sqlx::query("DELETE FROM stage_artifacts WHERE produced_at < ?")
                .bind(&cutoff)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            Ok(result.rows_affected())
        })
        .await?;

        if deleted > 0 {
            debug!(deleted, "Pruned aged artifacts");
        }
        Ok(deleted)
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stage_artifacts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Fixed-width UTC form so string comparison orders rows by time
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::models::{LyricLine, MonoAudio, SynthesizedVocals, LineSpan};
    use std::sync::Arc;

    fn fp(name: &str) -> Fingerprint {
        Fingerprint::builder().field(name).finish()
    }

    fn vocals_artifact() -> StageArtifact {
        let vocals = SynthesizedVocals {
            audio: MonoAudio::new(vec![0.25, -0.5, 1.0e-7], 22_050),
            lines: vec![LineSpan::new(0, 3)],
        };
        StageArtifact::new(
            StageKind::Synthesize,
            fp("vocals"),
            ArtifactPayload::Vocals(Arc::new(vocals)),
            [fp("lyrics")].into_iter().collect(),
        )
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let db = ArtifactDb::new(init_memory_pool().await.unwrap(), 1_000);
        let artifact = vocals_artifact();
        db.save(&artifact).await.unwrap();

        let loaded = db.load(&artifact.fingerprint).await.unwrap().unwrap();
        assert_eq!(loaded.stage, StageKind::Synthesize);
        assert_eq!(loaded.payload, artifact.payload);
        assert_eq!(loaded.upstream, artifact.upstream);
        assert_eq!(
            loaded.produced_at.timestamp_millis(),
            artifact.produced_at.timestamp_millis()
        );
        assert!(db.load(&fp("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_insert_wins() {
        let db = ArtifactDb::new(init_memory_pool().await.unwrap(), 1_000);
        let first = StageArtifact::new(
            StageKind::Refine,
            fp("lines"),
            ArtifactPayload::Lyrics(Arc::new(vec![LyricLine::new("first")])),
            BTreeSet::new(),
        );
        let mut second = first.clone();
        second.payload = ArtifactPayload::Lyrics(Arc::new(vec![LyricLine::new("second")]));

        db.save(&first).await.unwrap();
        db.save(&second).await.unwrap();
        assert_eq!(db.count().await.unwrap(), 1);
        assert_eq!(db.load(&first.fingerprint).await.unwrap().unwrap().payload, first.payload);
    }

    #[tokio::test]
    async fn test_prune_by_age() {
        let db = ArtifactDb::new(init_memory_pool().await.unwrap(), 1_000);
        let mut old = vocals_artifact();
        old.produced_at = Utc::now() - chrono::Duration::hours(48);
        let mut fresh = vocals_artifact();
        fresh.fingerprint = fp("fresh");

        db.save(&old).await.unwrap();
        db.save(&fresh).await.unwrap();
        assert_eq!(db.prune(Duration::from_secs(24 * 3600)).await.unwrap(), 1);
        assert!(db.load(&old.fingerprint).await.unwrap().is_none());
        assert!(db.load(&fresh.fingerprint).await.unwrap().is_some());
    }
}
