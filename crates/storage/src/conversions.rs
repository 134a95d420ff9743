use alloy_primitives::{Address, B256, Bytes, U256};
use eyre::{Result, WrapErr, eyre};
use messages::{L2SentMessage, RollupBatch};
use sqlx::{Row, postgres::PgRow};

pub(crate) fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).wrap_err_with(|| format!("{value} does not fit in a BIGINT"))
}

pub(crate) fn from_sql_int(value: i64) -> Result<u64> {
    u64::try_from(value).wrap_err_with(|| format!("negative value {value} in an unsigned column"))
}

fn opt_from_sql_int(value: Option<i64>) -> Result<Option<u64>> {
    value.map(from_sql_int).transpose()
}

fn hash_column(row: &PgRow, column: &str) -> Result<B256> {
    let bytes: Vec<u8> = row.try_get(column)?;
    B256::try_from(bytes.as_slice()).map_err(|_| eyre!("{column} is not a 32 byte hash"))
}

fn address_column(row: &PgRow, column: &str) -> Result<Address> {
    let bytes: Vec<u8> = row.try_get(column)?;
    Address::try_from(bytes.as_slice()).map_err(|_| eyre!("{column} is not a 20 byte address"))
}

fn u256_column(row: &PgRow, column: &str) -> Result<U256> {
    let value: String = row.try_get(column)?;
    value.parse().wrap_err_with(|| format!("{column} holds an invalid integer {value}"))
}

pub(crate) fn sent_message_from_row(row: &PgRow) -> Result<L2SentMessage> {
    let original_sender: Option<Vec<u8>> = row.try_get("original_sender")?;
    let original_sender = original_sender
        .map(|bytes| Address::try_from(bytes.as_slice()))
        .transpose()
        .map_err(|_| eyre!("original_sender is not a 20 byte address"))?;
    let merkle_proof: Option<Vec<u8>> = row.try_get("merkle_proof")?;
    let message: Vec<u8> = row.try_get("message")?;

    Ok(L2SentMessage {
        nonce: from_sql_int(row.try_get("nonce")?)?,
        msg_hash: hash_column(row, "msg_hash")?,
        height: from_sql_int(row.try_get("height")?)?,
        tx_hash: hash_column(row, "tx_hash")?,
        sender: address_column(row, "sender")?,
        target: address_column(row, "target")?,
        original_sender,
        value: u256_column(row, "value")?,
        message: Bytes::from(message),
        batch_index: opt_from_sql_int(row.try_get("batch_index")?)?,
        merkle_proof: merkle_proof.map(Bytes::from),
    })
}

pub(crate) fn rollup_batch_from_row(row: &PgRow) -> Result<RollupBatch> {
    Ok(RollupBatch {
        batch_index: from_sql_int(row.try_get("batch_index")?)?,
        batch_hash: hash_column(row, "batch_hash")?,
        commit_height: from_sql_int(row.try_get("commit_height")?)?,
        start_block: from_sql_int(row.try_get("start_block")?)?,
        end_block: from_sql_int(row.try_get("end_block")?)?,
    })
}

pub(crate) fn decimal_strings(values: &[U256]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_int_bounds() {
        assert_eq!(to_sql_int(42).unwrap(), 42);
        assert!(to_sql_int(u64::MAX).is_err());
        assert_eq!(from_sql_int(7).unwrap(), 7);
        assert!(from_sql_int(-1).is_err());
        assert_eq!(opt_from_sql_int(None).unwrap(), None);
    }

    #[test]
    fn test_decimal_strings() {
        let values = [U256::from(1), U256::MAX];
        let strings = decimal_strings(&values);
        assert_eq!(strings[0], "1");
        assert_eq!(strings[1].parse::<U256>().unwrap(), U256::MAX);
    }
}
