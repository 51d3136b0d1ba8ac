//! Database schema for the gateway store

use rusqlite::Connection;

/// Creates all required database tables
pub fn create_all_tables(conn: &Connection) -> rusqlite::Result<()> {
    create_config_table(conn)?;
    create_parcel_table(conn)?;
    create_parcel_collection_table(conn)?;
    create_node_key_table(conn)?;
    Ok(())
}

/// Config table: small key→value mapping (public gateway address, key serials)
pub fn create_config_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS config (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Parcel table: serialized parcels keyed by an opaque store key
///
/// The (direction, sender, recipient, parcel_id) tuple is unique so a
/// re-stored parcel replaces its previous copy instead of duplicating it.
pub fn create_parcel_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS parcels (
            parcel_key TEXT PRIMARY KEY NOT NULL,
            direction INTEGER NOT NULL,
            sender_private_address TEXT NOT NULL,
            recipient_address TEXT NOT NULL,
            parcel_id TEXT NOT NULL,
            expiry INTEGER NOT NULL,
            data BLOB NOT NULL,
            stored_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            UNIQUE (direction, sender_private_address, recipient_address, parcel_id)
        )",
        [],
    )?;

    // Index for enumerating a recipient's queue
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_parcels_recipient
         ON parcels(direction, recipient_address)",
        [],
    )?;

    Ok(())
}

/// Parcel collection table: acknowledgements awaiting shipment
///
/// One row per collected endpoint-bound parcel; doubles as the duplicate
/// ingest filter.
pub fn create_parcel_collection_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS parcel_collections (
            sender_private_address TEXT NOT NULL,
            recipient_address TEXT NOT NULL,
            parcel_id TEXT NOT NULL,
            parcel_expiry INTEGER NOT NULL,
            collected_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            PRIMARY KEY (sender_private_address, recipient_address, parcel_id)
        )",
        [],
    )?;
    Ok(())
}

/// Node key table: key pairs and certificates, looked up by serial number
///
/// Which row is the current identity (and which the CCA issuer) is recorded
/// in the config table.
pub fn create_node_key_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS node_keys (
            serial_number TEXT PRIMARY KEY NOT NULL,
            private_key BLOB NOT NULL CHECK (length(private_key) = 32),
            certificate BLOB NOT NULL,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
        [],
    )?;
    Ok(())
}
