//! Schema definitions for the Postgres tables

/// Table schema definition
#[derive(Debug)]
pub struct TableSchema {
    /// Table name
    pub name: &'static str,
    /// Column definitions
    pub columns: &'static str,
    /// Index statements run after the table exists
    pub indexes: &'static [&'static str],
}

/// Predicate selecting rows that were not rolled back.
pub const LIVE: &str = "deleted_at IS NULL";

/// Names of all tables
pub const TABLES: &[&str] = &["cross_message", "relayed_message", "l2_sent_message", "rollup_batch"];

/// Schema definitions for tables
pub const TABLE_SCHEMAS: &[TableSchema] = &[
    TableSchema {
        name: "cross_message",
        columns: "id BIGSERIAL PRIMARY KEY,
                 layer SMALLINT NOT NULL,
                 height BIGINT NOT NULL,
                 tx_hash BYTEA NOT NULL,
                 log_index BIGINT NOT NULL,
                 sender BYTEA NOT NULL,
                 target BYTEA NOT NULL,
                 asset SMALLINT NOT NULL,
                 amount TEXT NOT NULL,
                 l1_token BYTEA,
                 l2_token BYTEA,
                 token_ids TEXT[] NOT NULL DEFAULT '{}',
                 token_amounts TEXT[] NOT NULL DEFAULT '{}',
                 msg_hash BYTEA,
                 counterparty_tx_hash BYTEA,
                 block_timestamp TIMESTAMPTZ,
                 created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                 deleted_at TIMESTAMPTZ",
        indexes: &[
            "CREATE UNIQUE INDEX IF NOT EXISTS cross_message_origin_uidx
             ON cross_message (layer, tx_hash, log_index) WHERE deleted_at IS NULL",
            "CREATE INDEX IF NOT EXISTS cross_message_height_idx
             ON cross_message (layer, height) WHERE deleted_at IS NULL",
            "CREATE INDEX IF NOT EXISTS cross_message_msg_hash_idx
             ON cross_message (msg_hash) WHERE deleted_at IS NULL",
        ],
    },
    TableSchema {
        name: "relayed_message",
        columns: "id BIGSERIAL PRIMARY KEY,
                 layer SMALLINT NOT NULL,
                 msg_hash BYTEA NOT NULL,
                 height BIGINT NOT NULL,
                 tx_hash BYTEA NOT NULL,
                 created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                 deleted_at TIMESTAMPTZ",
        indexes: &[
            "CREATE UNIQUE INDEX IF NOT EXISTS relayed_message_hash_uidx
             ON relayed_message (layer, msg_hash) WHERE deleted_at IS NULL",
            "CREATE INDEX IF NOT EXISTS relayed_message_height_idx
             ON relayed_message (layer, height) WHERE deleted_at IS NULL",
        ],
    },
    TableSchema {
        name: "l2_sent_message",
        columns: "id BIGSERIAL PRIMARY KEY,
                 nonce BIGINT NOT NULL,
                 msg_hash BYTEA NOT NULL,
                 height BIGINT NOT NULL,
                 tx_hash BYTEA NOT NULL,
                 sender BYTEA NOT NULL,
                 target BYTEA NOT NULL,
                 original_sender BYTEA,
                 value TEXT NOT NULL,
                 message BYTEA NOT NULL,
                 batch_index BIGINT,
                 merkle_proof BYTEA,
                 created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                 deleted_at TIMESTAMPTZ",
        indexes: &[
            "CREATE UNIQUE INDEX IF NOT EXISTS l2_sent_message_nonce_uidx
             ON l2_sent_message (nonce) WHERE deleted_at IS NULL",
            "CREATE UNIQUE INDEX IF NOT EXISTS l2_sent_message_hash_uidx
             ON l2_sent_message (msg_hash) WHERE deleted_at IS NULL",
            "CREATE INDEX IF NOT EXISTS l2_sent_message_height_idx
             ON l2_sent_message (height) WHERE deleted_at IS NULL",
        ],
    },
    TableSchema {
        name: "rollup_batch",
        columns: "batch_index BIGINT PRIMARY KEY,
                 batch_hash BYTEA NOT NULL,
                 commit_height BIGINT NOT NULL,
                 start_block BIGINT NOT NULL,
                 end_block BIGINT NOT NULL,
                 created_at TIMESTAMPTZ NOT NULL DEFAULT now()",
        indexes: &[],
    },
];
