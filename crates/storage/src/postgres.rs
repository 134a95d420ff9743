//! Postgres implementation of [`BridgeStore`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Debug;
use eyre::{Context, Result};
use messages::{
    CrossMessage, L2SentMessage, Layer, LayerEvents, ProcessedHeights, RelayedMessage,
    RollupBatch,
};
use sqlx::{
    PgPool, Postgres, Row, Transaction,
    postgres::{PgPoolOptions, PgRow},
};
use tracing::{debug, info};

use crate::{
    conversions::{
        decimal_strings, from_sql_int, rollup_batch_from_row, sent_message_from_row, to_sql_int,
    },
    schema::{LIVE, TABLE_SCHEMAS, TABLES, TableSchema},
    store::{BridgeStore, ProofUpdate, RollbackSummary},
};

const SENT_MESSAGE_COLUMNS: &str = "nonce, msg_hash, height, tx_hash, sender, target, \
                                    original_sender, value, message, batch_index, merkle_proof";

/// Postgres backed store.
#[derive(Clone, Debug)]
pub struct PgStore {
    #[debug(skip)]
    pool: PgPool,
}

impl PgStore {
    /// Connects to `database_url` with a pool of at most `max_connections`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .wrap_err("Failed to connect to postgres")?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        let query = format!("CREATE TABLE IF NOT EXISTS {} ({})", schema.name, schema.columns);
        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .wrap_err_with(|| format!("Failed to create {} table", schema.name))?;

        for index in schema.indexes {
            sqlx::query(index)
                .execute(&self.pool)
                .await
                .wrap_err_with(|| format!("Failed to index {} table", schema.name))?;
        }
        Ok(())
    }

    async fn drop_table(&self, table_name: &str) -> Result<()> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table_name}"))
            .execute(&self.pool)
            .await
            .wrap_err_with(|| format!("Failed to drop {table_name} table"))?;
        Ok(())
    }

    /// Creates the schema, dropping every table first when `reset` is set.
    pub async fn init_db(&self, reset: bool) -> Result<()> {
        if reset {
            for table in TABLES {
                self.drop_table(table).await?;
            }
            info!("Database reset complete");
        }
        for schema in TABLE_SCHEMAS {
            self.create_table(schema).await?;
        }
        debug!("Schema initialized");
        Ok(())
    }

    async fn max_height(&self, table: &str, layer: Option<Layer>) -> Result<Option<u64>> {
        let row = match layer {
            Some(layer) => {
                sqlx::query(&format!(
                    "SELECT MAX(height) AS height FROM {table} WHERE layer = $1 AND {LIVE}"
                ))
                .bind(layer.as_i16())
                .fetch_one(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("SELECT MAX(height) AS height FROM {table} WHERE {LIVE}"))
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .wrap_err_with(|| format!("Failed to read processed height of {table}"))?;

        let height: Option<i64> = row.try_get("height")?;
        height.map(from_sql_int).transpose()
    }

    async fn fetch_sent_message(&self, query: &str, bind: Option<i64>) -> Result<Option<L2SentMessage>> {
        let query = sqlx::query(query);
        let query = match bind {
            Some(value) => query.bind(value),
            None => query,
        };
        let row: Option<PgRow> = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(sent_message_from_row).transpose()
    }
}

async fn insert_cross_message(
    tx: &mut Transaction<'_, Postgres>,
    message: &CrossMessage,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO cross_message
            (layer, height, tx_hash, log_index, sender, target, asset, amount, l1_token, l2_token,
             token_ids, token_amounts, msg_hash, block_timestamp)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
         ON CONFLICT (layer, tx_hash, log_index) WHERE deleted_at IS NULL DO NOTHING",
    )
    .bind(message.layer.as_i16())
    .bind(to_sql_int(message.height)?)
    .bind(message.tx_hash.as_slice())
    .bind(to_sql_int(message.log_index)?)
    .bind(message.sender.as_slice())
    .bind(message.target.as_slice())
    .bind(message.asset.as_i16())
    .bind(message.amount.to_string())
    .bind(message.l1_token.as_ref().map(|a| a.as_slice()))
    .bind(message.l2_token.as_ref().map(|a| a.as_slice()))
    .bind(decimal_strings(&message.token_ids))
    .bind(decimal_strings(&message.token_amounts))
    .bind(message.msg_hash.as_ref().map(|h| h.as_slice()))
    .bind(message.block_timestamp)
    .execute(&mut **tx)
    .await
    .wrap_err("Failed to insert cross message")?;
    Ok(())
}

async fn insert_relayed_message(
    tx: &mut Transaction<'_, Postgres>,
    message: &RelayedMessage,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO relayed_message (layer, msg_hash, height, tx_hash)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (layer, msg_hash) WHERE deleted_at IS NULL DO NOTHING",
    )
    .bind(message.layer.as_i16())
    .bind(message.msg_hash.as_slice())
    .bind(to_sql_int(message.height)?)
    .bind(message.tx_hash.as_slice())
    .execute(&mut **tx)
    .await
    .wrap_err("Failed to insert relayed message")?;

    // the message originates on the other layer
    sqlx::query(&format!(
        "UPDATE cross_message SET counterparty_tx_hash = $1
         WHERE msg_hash = $2 AND layer <> $3 AND {LIVE}"
    ))
    .bind(message.tx_hash.as_slice())
    .bind(message.msg_hash.as_slice())
    .bind(message.layer.as_i16())
    .execute(&mut **tx)
    .await
    .wrap_err("Failed to link relayed message")?;
    Ok(())
}

async fn insert_sent_message(
    tx: &mut Transaction<'_, Postgres>,
    message: &L2SentMessage,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO l2_sent_message
            (nonce, msg_hash, height, tx_hash, sender, target, original_sender, value, message)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(to_sql_int(message.nonce)?)
    .bind(message.msg_hash.as_slice())
    .bind(to_sql_int(message.height)?)
    .bind(message.tx_hash.as_slice())
    .bind(message.sender.as_slice())
    .bind(message.target.as_slice())
    .bind(message.original_sender.as_ref().map(|a| a.as_slice()))
    .bind(message.value.to_string())
    .bind(message.message.as_ref())
    .execute(&mut **tx)
    .await
    .wrap_err_with(|| format!("Failed to insert sent message with nonce {}", message.nonce))?;
    Ok(())
}

#[async_trait]
impl BridgeStore for PgStore {
    async fn processed_heights(&self, layer: Layer) -> Result<ProcessedHeights> {
        let sent_message = match layer {
            Layer::L1 => None,
            Layer::L2 => self.max_height("l2_sent_message", None).await?,
        };
        Ok(ProcessedHeights {
            cross_message: self.max_height("cross_message", Some(layer)).await?,
            relayed_message: self.max_height("relayed_message", Some(layer)).await?,
            sent_message,
        })
    }

    async fn save_layer_events(&self, layer: Layer, events: &LayerEvents) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.wrap_err("Failed to begin transaction")?;

        for message in &events.cross_messages {
            insert_cross_message(&mut tx, message).await?;
        }
        for message in &events.relayed_messages {
            insert_relayed_message(&mut tx, message).await?;
        }
        for message in &events.sent_messages {
            insert_sent_message(&mut tx, message).await?;
        }
        for link in &events.hash_links {
            sqlx::query(&format!(
                "UPDATE cross_message SET msg_hash = $1
                 WHERE layer = $2 AND tx_hash = $3 AND log_index = $4 AND {LIVE}"
            ))
            .bind(link.msg_hash.as_slice())
            .bind(layer.as_i16())
            .bind(link.tx_hash.as_slice())
            .bind(to_sql_int(link.log_index)?)
            .execute(&mut *tx)
            .await
            .wrap_err("Failed to stitch message hash")?;
        }

        tx.commit().await.wrap_err("Failed to commit layer events")?;
        Ok(())
    }

    async fn rollback(&self, layer: Layer, height: u64) -> Result<RollbackSummary> {
        let height = to_sql_int(height)?;
        let mut tx = self.pool.begin().await.wrap_err("Failed to begin transaction")?;

        sqlx::query(&format!(
            "UPDATE cross_message SET counterparty_tx_hash = NULL
             WHERE layer <> $1 AND {LIVE} AND msg_hash IN (
                SELECT msg_hash FROM relayed_message WHERE layer = $1 AND height > $2 AND {LIVE}
             )"
        ))
        .bind(layer.as_i16())
        .bind(height)
        .execute(&mut *tx)
        .await
        .wrap_err("Failed to unlink relayed messages")?;

        let cross_messages = sqlx::query(&format!(
            "UPDATE cross_message SET deleted_at = now() WHERE layer = $1 AND height > $2 AND {LIVE}"
        ))
        .bind(layer.as_i16())
        .bind(height)
        .execute(&mut *tx)
        .await
        .wrap_err("Failed to roll back cross messages")?
        .rows_affected();

        let relayed_messages = sqlx::query(&format!(
            "UPDATE relayed_message SET deleted_at = now() WHERE layer = $1 AND height > $2 AND {LIVE}"
        ))
        .bind(layer.as_i16())
        .bind(height)
        .execute(&mut *tx)
        .await
        .wrap_err("Failed to roll back relayed messages")?
        .rows_affected();

        let sent_messages = match layer {
            Layer::L1 => 0,
            Layer::L2 => sqlx::query(&format!(
                "UPDATE l2_sent_message SET deleted_at = now() WHERE height > $1 AND {LIVE}"
            ))
            .bind(height)
            .execute(&mut *tx)
            .await
            .wrap_err("Failed to roll back sent messages")?
            .rows_affected(),
        };

        tx.commit().await.wrap_err("Failed to commit rollback")?;
        Ok(RollbackSummary { cross_messages, relayed_messages, sent_messages })
    }

    async fn insert_rollup_batches(&self, batches: &[RollupBatch]) -> Result<()> {
        if batches.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.wrap_err("Failed to begin transaction")?;
        for batch in batches {
            sqlx::query(
                "INSERT INTO rollup_batch (batch_index, batch_hash, commit_height, start_block, end_block)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(to_sql_int(batch.batch_index)?)
            .bind(batch.batch_hash.as_slice())
            .bind(to_sql_int(batch.commit_height)?)
            .bind(to_sql_int(batch.start_block)?)
            .bind(to_sql_int(batch.end_block)?)
            .execute(&mut *tx)
            .await
            .wrap_err_with(|| format!("Failed to insert batch {}", batch.batch_index))?;
        }
        tx.commit().await.wrap_err("Failed to commit rollup batches")?;
        Ok(())
    }

    async fn latest_rollup_batch(&self) -> Result<Option<RollupBatch>> {
        let row = sqlx::query(
            "SELECT batch_index, batch_hash, commit_height, start_block, end_block
             FROM rollup_batch ORDER BY batch_index DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .wrap_err("Failed to read latest rollup batch")?;
        row.as_ref().map(rollup_batch_from_row).transpose()
    }

    async fn rollup_batch_by_index(&self, batch_index: u64) -> Result<Option<RollupBatch>> {
        let row = sqlx::query(
            "SELECT batch_index, batch_hash, commit_height, start_block, end_block
             FROM rollup_batch WHERE batch_index = $1",
        )
        .bind(to_sql_int(batch_index)?)
        .fetch_optional(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to read rollup batch {batch_index}"))?;
        row.as_ref().map(rollup_batch_from_row).transpose()
    }

    async fn l2_sent_message_by_nonce(&self, nonce: u64) -> Result<Option<L2SentMessage>> {
        let query =
            format!("SELECT {SENT_MESSAGE_COLUMNS} FROM l2_sent_message WHERE nonce = $1 AND {LIVE}");
        self.fetch_sent_message(&query, Some(to_sql_int(nonce)?))
            .await
            .wrap_err_with(|| format!("Failed to read sent message {nonce}"))
    }

    async fn latest_proven_l2_sent_message(&self) -> Result<Option<L2SentMessage>> {
        let query = format!(
            "SELECT {SENT_MESSAGE_COLUMNS} FROM l2_sent_message
             WHERE merkle_proof IS NOT NULL AND {LIVE} ORDER BY nonce DESC LIMIT 1"
        );
        self.fetch_sent_message(&query, None).await.wrap_err("Failed to read latest proven message")
    }

    async fn l2_sent_messages_in_blocks(&self, start: u64, end: u64) -> Result<Vec<L2SentMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {SENT_MESSAGE_COLUMNS} FROM l2_sent_message
             WHERE height >= $1 AND height <= $2 AND {LIVE} ORDER BY nonce ASC"
        ))
        .bind(to_sql_int(start)?)
        .bind(to_sql_int(end)?)
        .fetch_all(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to read sent messages in blocks {start}..={end}"))?;
        rows.iter().map(sent_message_from_row).collect()
    }

    async fn latest_proven_batch_index(&self) -> Result<Option<u64>> {
        let row = sqlx::query(&format!(
            "SELECT MAX(batch_index) AS batch_index FROM l2_sent_message
             WHERE merkle_proof IS NOT NULL AND {LIVE}"
        ))
        .fetch_one(&self.pool)
        .await
        .wrap_err("Failed to read latest proven batch index")?;
        let batch_index: Option<i64> = row.try_get("batch_index")?;
        batch_index.map(from_sql_int).transpose()
    }

    async fn save_message_proofs(&self, batch_index: u64, proofs: &[ProofUpdate]) -> Result<()> {
        let batch = to_sql_int(batch_index)?;
        let mut tx = self.pool.begin().await.wrap_err("Failed to begin transaction")?;
        for update in proofs {
            let updated = sqlx::query(&format!(
                "UPDATE l2_sent_message SET merkle_proof = $1, batch_index = $2
                 WHERE msg_hash = $3 AND {LIVE}"
            ))
            .bind(update.proof.as_ref())
            .bind(batch)
            .bind(update.msg_hash.as_slice())
            .execute(&mut *tx)
            .await
            .wrap_err("Failed to store message proof")?
            .rows_affected();
            if updated != 1 {
                eyre::bail!("expected one live message with hash {}, found {updated}", update.msg_hash);
            }
        }
        tx.commit().await.wrap_err_with(|| format!("Failed to commit proofs of batch {batch_index}"))?;
        Ok(())
    }

    async fn earliest_height_without_timestamp(&self, layer: Layer) -> Result<Option<u64>> {
        let row = sqlx::query(&format!(
            "SELECT MIN(height) AS height FROM cross_message
             WHERE layer = $1 AND block_timestamp IS NULL AND {LIVE}"
        ))
        .bind(layer.as_i16())
        .fetch_one(&self.pool)
        .await
        .wrap_err("Failed to read earliest height without timestamp")?;
        let height: Option<i64> = row.try_get("height")?;
        height.map(from_sql_int).transpose()
    }

    async fn set_block_timestamp(
        &self,
        layer: Layer,
        height: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<u64> {
        let updated = sqlx::query(&format!(
            "UPDATE cross_message SET block_timestamp = $1
             WHERE layer = $2 AND height = $3 AND {LIVE}"
        ))
        .bind(timestamp)
        .bind(layer.as_i16())
        .bind(to_sql_int(height)?)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to set block timestamp at {height}"))?
        .rows_affected();
        Ok(updated)
    }
}
