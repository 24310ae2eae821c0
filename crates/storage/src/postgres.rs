//! Reference-data gateway over the FITS PostgreSQL schema.
//!
//! The `fits` schema, its reference tables (type, method, type_method,
//! sample, system) and the `fits.add_site` / `fits.add_observation`
//! functions are managed outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool, Postgres, Transaction,
};
use std::time::Duration;
use tracing::debug;

use fits_common::{Observation, Site, SourceDescriptor};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{ObservationTx, ReferenceGateway, StorageKeys};

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PgGatewayOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PgGatewayOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Gateway backed by a PostgreSQL connection pool.
///
/// Construct once per process after the database is reachable and pass it
/// to the reconciler.
#[derive(Clone)]
pub struct PgGateway {
    pool: PgPool,
}

impl PgGateway {
    /// Connect to the database and verify the connection.
    pub async fn connect(database_url: &str, options: &PgGatewayOptions) -> GatewayResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| GatewayError::from_sqlx("Connection failed", e))?;

        Ok(Self { pool })
    }

    /// Connect with explicit connection settings.
    pub async fn connect_with(
        connect: PgConnectOptions,
        options: &PgGatewayOptions,
    ) -> GatewayResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect_with(connect)
            .await
            .map_err(|e| GatewayError::from_sqlx("Connection failed", e))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close all pool connections. Call at shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Count observation rows for a site and type.
    pub async fn count_observations(&self, site_id: &str, type_id: &str) -> GatewayResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT count(*) FROM fits.observation \
             JOIN fits.site USING (sitepk) \
             JOIN fits.type USING (typepk) \
             WHERE siteid = $1 AND typeid = $2",
        )
        .bind(site_id)
        .bind(type_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| GatewayError::from_sqlx("Count observations failed", e))
    }
}

#[async_trait]
impl ReferenceGateway for PgGateway {
    type Tx = PgObservationTx;

    async fn resolve_site_pk(&self, site_id: &str) -> GatewayResult<i32> {
        sqlx::query_scalar::<_, i32>("SELECT sitepk FROM fits.site WHERE siteid = $1")
            .bind(site_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GatewayError::from_sqlx("Site lookup failed", e))?
            .ok_or_else(|| GatewayError::not_found("siteID", site_id))
    }

    async fn resolve_sample_pk(&self, sample_id: &str, system_id: &str) -> GatewayResult<i32> {
        sqlx::query_scalar::<_, i32>(
            "SELECT samplepk FROM fits.sample \
             JOIN fits.system USING (systempk) \
             WHERE sampleid = $1 AND systemid = $2",
        )
        .bind(sample_id)
        .bind(system_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GatewayError::from_sqlx("Sample lookup failed", e))?
        .ok_or_else(|| {
            GatewayError::not_found("sampleID.systemID", format!("{}.{}", sample_id, system_id))
        })
    }

    async fn resolve_method_pk(&self, method_id: &str) -> GatewayResult<i32> {
        sqlx::query_scalar::<_, i32>("SELECT methodpk FROM fits.method WHERE methodid = $1")
            .bind(method_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| GatewayError::from_sqlx("Method lookup failed", e))?
            .ok_or_else(|| GatewayError::not_found("methodID", method_id))
    }

    async fn resolve_type_pk(&self, type_id: &str, method_id: &str) -> GatewayResult<i32> {
        sqlx::query_scalar::<_, i32>(
            "SELECT typepk FROM fits.type \
             JOIN fits.type_method USING (typepk) \
             JOIN fits.method USING (methodpk) \
             WHERE typeid = $1 AND methodid = $2",
        )
        .bind(type_id)
        .bind(method_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| GatewayError::from_sqlx("Type lookup failed", e))?
        .ok_or_else(|| {
            GatewayError::not_found("typeID.methodID", format!("{}.{}", type_id, method_id))
        })
    }

    async fn upsert_site(&self, site: &Site) -> GatewayResult<()> {
        debug!(site_id = %site.site_id, "Adding or updating site");

        sqlx::query("SELECT fits.add_site($1, $2, $3, $4, $5, $6)")
            .bind(&site.site_id)
            .bind(&site.name)
            .bind(site.longitude)
            .bind(site.latitude)
            .bind(site.height)
            .bind(site.ground_relationship)
            .execute(&self.pool)
            .await
            .map_err(|e| GatewayError::from_sqlx("Add site failed", e))?;

        Ok(())
    }

    async fn upsert_observation(
        &self,
        source: &SourceDescriptor,
        observation: &Observation,
    ) -> GatewayResult<()> {
        sqlx::query("SELECT fits.add_observation($1, $2, $3, $4, $5, $6, $7, $8)")
            .bind(source.site_id())
            .bind(source.type_id())
            .bind(source.method_id())
            .bind(source.sample_id())
            .bind(source.system_id())
            .bind(observation.time)
            .bind(observation.value)
            .bind(observation.error)
            .execute(&self.pool)
            .await
            .map_err(|e| GatewayError::from_sqlx("Add observation failed", e))?;

        Ok(())
    }

    async fn begin(&self) -> GatewayResult<PgObservationTx> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| GatewayError::from_sqlx("Begin transaction failed", e))?;

        Ok(PgObservationTx { tx })
    }
}

/// An open PostgreSQL transaction. Rolled back by sqlx when dropped
/// without a commit.
pub struct PgObservationTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ObservationTx for PgObservationTx {
    async fn delete_observations_for_source(
        &mut self,
        site_id: &str,
        type_id: &str,
    ) -> GatewayResult<u64> {
        let result = sqlx::query(
            "DELETE FROM fits.observation \
             WHERE sitepk = (SELECT sitepk FROM fits.site WHERE siteid = $1) \
             AND typepk = (SELECT typepk FROM fits.type WHERE typeid = $2)",
        )
        .bind(site_id)
        .bind(type_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| GatewayError::from_sqlx("Delete observations failed", e))?;

        Ok(result.rows_affected())
    }

    async fn insert_observations_batch(
        &mut self,
        keys: &StorageKeys,
        observations: &[Observation],
    ) -> GatewayResult<u64> {
        if observations.is_empty() {
            return Ok(0);
        }

        // Column arrays bound as native types: values stay float8 end to end.
        let times: Vec<DateTime<Utc>> = observations.iter().map(|o| o.time).collect();
        let values: Vec<f64> = observations.iter().map(|o| o.value).collect();
        let errors: Vec<f64> = observations.iter().map(|o| o.error).collect();

        let result = sqlx::query(
            "INSERT INTO fits.observation (sitepk, typepk, methodpk, samplepk, time, value, error) \
             SELECT $1, $2, $3, $4, o.time, o.value, o.error \
             FROM UNNEST($5::timestamptz[], $6::float8[], $7::float8[]) AS o(time, value, error)",
        )
        .bind(keys.site_pk)
        .bind(keys.type_pk)
        .bind(keys.method_pk)
        .bind(keys.sample_pk)
        .bind(times)
        .bind(values)
        .bind(errors)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| GatewayError::from_sqlx("Insert observations failed", e))?;

        Ok(result.rows_affected())
    }

    async fn commit(self) -> GatewayResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| GatewayError::from_sqlx("Commit failed", e))
    }

    async fn rollback(self) -> GatewayResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| GatewayError::from_sqlx("Rollback failed", e))
    }
}
