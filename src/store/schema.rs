//! Embedded database schema.
//!
//! Table and column names follow the wire-level schema the rest of the
//! tooling expects; all `*_TIME`, `NBEFORE`, `NAFTER`, `THISUPDATE`,
//! `NEXTUPDATE`, `LUPDATE`, `RT` and `RIT` columns hold 64-bit epoch
//! seconds, serials are lowercase hex, DER blobs are base64 text.

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: u32 = 5;
pub const DEFAULT_X500NAME_MAXLEN: usize = 350;

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS DBSCHEMA (
    NAME   TEXT NOT NULL PRIMARY KEY,
    VALUE2 TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS SYSTEM_EVENT (
    NAME        TEXT NOT NULL PRIMARY KEY,
    EVENT_TIME  INTEGER NOT NULL,
    EVENT_OWNER TEXT
);

CREATE TABLE IF NOT EXISTS CA (
    ID              INTEGER NOT NULL PRIMARY KEY,
    NAME            TEXT NOT NULL UNIQUE,
    STATUS          TEXT NOT NULL,
    NEXT_CRLNO      INTEGER,
    CRL_SIGNER_NAME TEXT,
    SUBJECT         TEXT NOT NULL,
    REV_INFO        TEXT,
    CERT            TEXT NOT NULL,
    SIGNER_TYPE     TEXT,
    SIGNER_CONF     TEXT,
    CERTCHAIN       TEXT,
    CONF            TEXT
);

CREATE TABLE IF NOT EXISTS PROFILE (
    ID   INTEGER NOT NULL PRIMARY KEY,
    NAME TEXT NOT NULL UNIQUE,
    TYPE TEXT,
    CONF TEXT
);

CREATE TABLE IF NOT EXISTS REQUESTOR (
    ID   INTEGER NOT NULL PRIMARY KEY,
    NAME TEXT NOT NULL UNIQUE,
    TYPE TEXT,
    CONF TEXT
);

CREATE TABLE IF NOT EXISTS PUBLISHER (
    ID   INTEGER NOT NULL PRIMARY KEY,
    NAME TEXT NOT NULL UNIQUE,
    TYPE TEXT,
    CONF TEXT
);

CREATE TABLE IF NOT EXISTS SIGNER (
    ID   INTEGER NOT NULL PRIMARY KEY,
    NAME TEXT NOT NULL UNIQUE,
    TYPE TEXT,
    CONF TEXT
);

CREATE TABLE IF NOT EXISTS KEYPAIR_GEN (
    ID   INTEGER NOT NULL PRIMARY KEY,
    NAME TEXT NOT NULL UNIQUE,
    TYPE TEXT,
    CONF TEXT
);

CREATE TABLE IF NOT EXISTS CA_HAS_REQUESTOR (
    CA_ID        INTEGER NOT NULL REFERENCES CA(ID) ON DELETE CASCADE,
    REQUESTOR_ID INTEGER NOT NULL REFERENCES REQUESTOR(ID) ON DELETE CASCADE,
    PERMISSION   INTEGER,
    PROFILES     TEXT,
    PRIMARY KEY (CA_ID, REQUESTOR_ID)
);

CREATE TABLE IF NOT EXISTS CA_HAS_PROFILE (
    CA_ID      INTEGER NOT NULL REFERENCES CA(ID) ON DELETE CASCADE,
    PROFILE_ID INTEGER NOT NULL REFERENCES PROFILE(ID) ON DELETE CASCADE,
    PRIMARY KEY (CA_ID, PROFILE_ID)
);

CREATE TABLE IF NOT EXISTS CA_HAS_PUBLISHER (
    CA_ID        INTEGER NOT NULL REFERENCES CA(ID) ON DELETE CASCADE,
    PUBLISHER_ID INTEGER NOT NULL REFERENCES PUBLISHER(ID) ON DELETE CASCADE,
    PRIMARY KEY (CA_ID, PUBLISHER_ID)
);

CREATE TABLE IF NOT EXISTS CERT (
    ID          INTEGER NOT NULL PRIMARY KEY,
    LUPDATE     INTEGER NOT NULL,
    SN          TEXT NOT NULL,
    SUBJECT     TEXT NOT NULL,
    FP_S        INTEGER NOT NULL,
    FP_RS       INTEGER,
    NBEFORE     INTEGER NOT NULL,
    NAFTER      INTEGER NOT NULL,
    REV         INTEGER NOT NULL,
    PID         INTEGER NOT NULL,
    CA_ID       INTEGER NOT NULL REFERENCES CA(ID),
    RID         INTEGER,
    UID         INTEGER,
    EE          INTEGER NOT NULL,
    RTYPE       INTEGER NOT NULL,
    TID         TEXT,
    SHA1        TEXT NOT NULL,
    REQ_SUBJECT TEXT,
    CRL_SCOPE   INTEGER NOT NULL DEFAULT 0,
    CERT        TEXT NOT NULL,
    FP_K        INTEGER,
    RR          INTEGER,
    RT          INTEGER,
    RIT         INTEGER,
    UNIQUE (CA_ID, SN)
);

CREATE INDEX IF NOT EXISTS IDX_CERT_CA_SN ON CERT (CA_ID, SN);
CREATE INDEX IF NOT EXISTS IDX_CERT_FPS ON CERT (FP_S, CA_ID);
CREATE INDEX IF NOT EXISTS IDX_CERT_REV ON CERT (CA_ID, REV, NAFTER);

CREATE TABLE IF NOT EXISTS CRL (
    ID         INTEGER NOT NULL PRIMARY KEY,
    CA_ID      INTEGER NOT NULL REFERENCES CA(ID),
    CRL_NO     INTEGER NOT NULL,
    THISUPDATE INTEGER NOT NULL,
    NEXTUPDATE INTEGER,
    DELTACRL   INTEGER NOT NULL,
    BASECRL_NO INTEGER,
    CRL_SCOPE  INTEGER NOT NULL DEFAULT 0,
    CRL        TEXT NOT NULL,
    UNIQUE (CA_ID, CRL_NO, DELTACRL)
);

CREATE TABLE IF NOT EXISTS PUBLISHQUEUE (
    PID   INTEGER NOT NULL,
    CA_ID INTEGER NOT NULL,
    CID   INTEGER NOT NULL,
    PRIMARY KEY (PID, CID)
);

CREATE TABLE IF NOT EXISTS REQUEST (
    ID      INTEGER NOT NULL PRIMARY KEY,
    LUPDATE INTEGER NOT NULL,
    DATA    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS REQCERT (
    ID  INTEGER NOT NULL PRIMARY KEY,
    RID INTEGER NOT NULL,
    CID INTEGER NOT NULL
);
"#;

/// Create all tables and seed the DBSCHEMA variables.
pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(DDL)?;
    conn.execute(
        "INSERT OR IGNORE INTO DBSCHEMA (NAME, VALUE2) VALUES ('VERSION', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO DBSCHEMA (NAME, VALUE2) VALUES ('X500NAME_MAXLEN', ?1)",
        [DEFAULT_X500NAME_MAXLEN.to_string()],
    )?;
    Ok(())
}
