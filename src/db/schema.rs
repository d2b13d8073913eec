//! Database schema and migrations for stowage.
//!
//! Each migration is applied once, in order; `schema_version` records
//! which ones have run.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: item tree
    r#"
-- Folders and files, one row per node. `path` is materialised.
CREATE TABLE items (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id        INTEGER NOT NULL,
    parent_id       INTEGER REFERENCES items(id) ON DELETE CASCADE,
    kind            TEXT NOT NULL CHECK (kind IN ('folder', 'file')),
    name            TEXT NOT NULL,
    path            TEXT NOT NULL,
    mime_type       TEXT,
    file_size       INTEGER NOT NULL DEFAULT 0,
    uploaded_size   INTEGER NOT NULL DEFAULT 0,
    stored_name     TEXT,
    download_url    TEXT,
    thumbnail_url   TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    CHECK (uploaded_size >= 0 AND uploaded_size <= file_size),
    UNIQUE (owner_id, path)
);

CREATE INDEX idx_items_parent ON items(owner_id, parent_id);
CREATE INDEX idx_items_incomplete ON items(kind, updated_at) WHERE uploaded_size < file_size;
"#,
    // v2: storage accounts and their grants
    r#"
CREATE TABLE accounts (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id        INTEGER NOT NULL,
    name            TEXT NOT NULL,
    capacity_bytes  INTEGER NOT NULL,
    used_bytes      INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    CHECK (used_bytes >= 0 AND used_bytes <= capacity_bytes),
    UNIQUE (owner_id, name)
);

CREATE TABLE allocations (
    item_id     INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    account_id  INTEGER NOT NULL REFERENCES accounts(id),
    bytes       INTEGER NOT NULL CHECK (bytes > 0),
    PRIMARY KEY (item_id, account_id)
);

CREATE INDEX idx_allocations_account ON allocations(account_id);
"#,
    // v3: received chunk ranges for uploads still in progress
    r#"
CREATE TABLE upload_ranges (
    item_id     INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    start_byte  INTEGER NOT NULL,
    end_byte    INTEGER NOT NULL,
    CHECK (start_byte < end_byte),
    PRIMARY KEY (item_id, start_byte, end_byte)
);
"#,
];
