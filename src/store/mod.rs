//! Persistent certificate store.
//!
//! One SQLite-backed store shared by all CAs: issued certificates with
//! their revocation rows, CRL blobs, the publish queue, the request
//! archive and system events. Rows are addressed by monotonic id, by
//! `(CA, serial)` and by canonical subject fingerprint.
//!
//! Absence is never an error here: lookups return `None` or a typed
//! unknown result. Backend failures surface as `database_failure`; an
//! update that does not change exactly one row during a revocation step
//! is a `system_failure`.

pub mod dialect;
pub mod schema;

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use lru::LruCache;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use tracing::{debug, warn};

use crate::crl::CrlInfo;
use crate::error::{OperationError, Result};
use crate::types::{
    CertRevInfoWithSerial, CertRevocationInfo, CertStatus, CrlReason, KnownCertResult, NameId,
    RequestType, SerialNumber, SerialWithId,
};
use crate::uid::UniqueIdGenerator;
use crate::x509::{cut_text, X500Name, X509Cert};

use dialect::{SqlDialect, SqliteDialect};

/// A stored certificate together with its row id.
#[derive(Clone, Debug)]
pub struct StoredCert {
    pub cert_id: i64,
    pub cert: X509Cert,
}

/// Certificate plus revocation state, as returned by `(CA, serial)`
/// lookups.
#[derive(Clone, Debug)]
pub struct CertWithRevInfo {
    pub cert: StoredCert,
    pub profile_id: i32,
    pub rev_info: Option<CertRevocationInfo>,
}

/// Certificate row with full issuance metadata.
#[derive(Clone, Debug)]
pub struct CertInfo {
    pub cert: StoredCert,
    pub profile_id: i32,
    pub requestor_id: Option<i32>,
    pub rev_info: Option<CertRevocationInfo>,
}

/// One row of a certificate listing.
#[derive(Clone, Debug)]
pub struct CertListEntry {
    pub serial: SerialNumber,
    pub subject: String,
    pub not_before: i64,
    pub not_after: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertListOrderBy {
    NotBefore,
    NotBeforeDesc,
    NotAfter,
    NotAfterDesc,
    Subject,
    SubjectDesc,
}

impl CertListOrderBy {
    fn sql(self) -> &'static str {
        match self {
            CertListOrderBy::NotBefore => "NBEFORE",
            CertListOrderBy::NotBeforeDesc => "NBEFORE DESC",
            CertListOrderBy::NotAfter => "NAFTER",
            CertListOrderBy::NotAfterDesc => "NAFTER DESC",
            CertListOrderBy::Subject => "SUBJECT",
            CertListOrderBy::SubjectDesc => "SUBJECT DESC",
        }
    }
}

/// Named system event with its time and owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemEvent {
    pub name: String,
    pub event_time: i64,
    pub owner: String,
}

type SqlCache = Mutex<LruCache<usize, String>>;

fn sql_cache() -> SqlCache {
    Mutex::new(LruCache::new(NonZeroUsize::new(5).unwrap_or(NonZeroUsize::MIN)))
}

pub struct CertStore {
    pool: Pool<SqliteConnectionManager>,
    dialect: Box<dyn SqlDialect>,
    id_generator: Arc<UniqueIdGenerator>,
    db_schema_version: u32,
    max_x500name_len: usize,

    sql_cert_with_rev_info: String,
    sql_cert_info: String,
    sql_cert_for_id: String,
    sql_crl_latest: String,
    sql_crl_with_no: String,
    sql_latest_serial_for_subject_like: String,
    sql_select_unrevoked_sn: String,

    cache_sql_cid_from_publish_queue: SqlCache,
    cache_sql_expired_serials: SqlCache,
    cache_sql_suspended_serials: SqlCache,
    cache_sql_revoked_certs: SqlCache,
    cache_sql_serials: SqlCache,
    cache_sql_serials_revoked: SqlCache,
}

impl std::fmt::Debug for CertStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertStore")
            .field("db_schema_version", &self.db_schema_version)
            .field("max_x500name_len", &self.max_x500name_len)
            .finish_non_exhaustive()
    }
}

impl CertStore {
    /// Open the store over a connection pool. The schema must exist;
    /// a version mismatch aborts startup.
    pub fn new(
        pool: Pool<SqliteConnectionManager>,
        id_generator: Arc<UniqueIdGenerator>,
    ) -> Result<Self> {
        let dialect: Box<dyn SqlDialect> = Box::new(SqliteDialect);

        let (db_schema_version, max_x500name_len) = {
            let conn = pool.get()?;
            let version: String = conn
                .query_row("SELECT VALUE2 FROM DBSCHEMA WHERE NAME='VERSION'", [], |row| row.get(0))
                .map_err(|_| OperationError::system_failure("DBSCHEMA has no VERSION"))?;
            let max_len: String = conn
                .query_row(
                    "SELECT VALUE2 FROM DBSCHEMA WHERE NAME='X500NAME_MAXLEN'",
                    [],
                    |row| row.get(0),
                )
                .map_err(|_| OperationError::system_failure("DBSCHEMA has no X500NAME_MAXLEN"))?;
            let version: u32 = version
                .parse()
                .map_err(|_| OperationError::system_failure("unparsable schema VERSION"))?;
            if version != schema::SCHEMA_VERSION {
                return Err(OperationError::system_failure(format!(
                    "unsupported schema version {version}, expected {}",
                    schema::SCHEMA_VERSION
                )));
            }
            let max_len: usize = max_len
                .parse()
                .map_err(|_| OperationError::system_failure("unparsable X500NAME_MAXLEN"))?;
            (version, max_len)
        };

        let first = |core: &str| dialect.build_select_first_sql(1, None, core);

        Ok(Self {
            sql_cert_with_rev_info: first("ID,REV,RR,RT,RIT,PID,CERT FROM CERT WHERE CA_ID=?1 AND SN=?2"),
            sql_cert_info: first("ID,PID,RID,REV,RR,RT,RIT,CERT FROM CERT WHERE CA_ID=?1 AND SN=?2"),
            sql_cert_for_id: first("PID,RID,REV,RR,RT,RIT,CERT FROM CERT WHERE ID=?1"),
            sql_crl_latest: dialect.build_select_first_sql(
                1,
                Some("THISUPDATE DESC"),
                "THISUPDATE,CRL FROM CRL WHERE CA_ID=?1",
            ),
            sql_crl_with_no: dialect.build_select_first_sql(
                1,
                Some("THISUPDATE DESC"),
                "THISUPDATE,CRL FROM CRL WHERE CA_ID=?1 AND CRL_NO=?2",
            ),
            sql_latest_serial_for_subject_like: dialect.build_select_first_sql(
                1,
                Some("NBEFORE DESC"),
                "SUBJECT FROM CERT WHERE SUBJECT LIKE ?1",
            ),
            sql_select_unrevoked_sn: first("LUPDATE FROM CERT WHERE CA_ID=?1 AND REV=0 AND SN=?2"),
            cache_sql_cid_from_publish_queue: sql_cache(),
            cache_sql_expired_serials: sql_cache(),
            cache_sql_suspended_serials: sql_cache(),
            cache_sql_revoked_certs: sql_cache(),
            cache_sql_serials: sql_cache(),
            cache_sql_serials_revoked: sql_cache(),
            pool,
            dialect,
            id_generator,
            db_schema_version,
            max_x500name_len,
        })
    }

    /// Open an in-memory store with a fresh schema. Test and tooling
    /// convenience.
    pub fn open_in_memory(id_generator: Arc<UniqueIdGenerator>) -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(OperationError::from)?;
        {
            let conn = pool.get()?;
            schema::initialize(&conn)?;
        }
        Self::new(pool, id_generator)
    }

    pub fn db_schema_version(&self) -> u32 {
        self.db_schema_version
    }

    pub fn max_x500name_len(&self) -> usize {
        self.max_x500name_len
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(OperationError::from)
    }

    // ------------------------------------------------------------------
    // certificates

    /// Persist one issued certificate. The row is written in a single
    /// insert: either fully visible or the allocated id stays unused.
    #[allow(clippy::too_many_arguments)]
    pub fn add_cert(
        &self,
        ca: &NameId,
        cert: &X509Cert,
        profile: &NameId,
        requestor: &NameId,
        user_id: Option<i32>,
        req_type: RequestType,
        transaction_id: Option<&[u8]>,
        requested_subject: Option<&X500Name>,
    ) -> Result<i64> {
        let cert_id = self.id_generator.next_id();

        let subject_text = cut_text(&cert.subject().to_text(), self.max_x500name_len);
        let fp_subject = cert.subject().canonical_fingerprint();

        let mut fp_req_subject = None;
        let mut req_subject_text = None;
        if let Some(req_subject) = requested_subject {
            let fp = req_subject.canonical_fingerprint();
            if fp != fp_subject {
                fp_req_subject = Some(fp);
                req_subject_text = Some(cut_text(&req_subject.to_text(), self.max_x500name_len));
            }
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO CERT (ID,LUPDATE,SN,SUBJECT,FP_S,FP_RS,NBEFORE,NAFTER,REV,PID,\
             CA_ID,RID,UID,EE,RTYPE,TID,SHA1,REQ_SUBJECT,CRL_SCOPE,CERT) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,0,?9,?10,?11,?12,?13,?14,?15,?16,?17,0,?18)",
            params![
                cert_id,
                now_seconds(),
                cert.serial().to_hex(),
                subject_text,
                fp_subject,
                fp_req_subject,
                cert.not_before(),
                cert.not_after(),
                profile.id,
                ca.id,
                requestor.id,
                user_id,
                cert.is_end_entity() as i32,
                req_type.code(),
                transaction_id.map(|tid| BASE64.encode(tid)),
                cert.sha1_fp_base64(),
                req_subject_text,
                BASE64.encode(cert.der()),
            ],
        )?;
        debug!(ca = %ca.name, serial = %cert.serial(), cert_id, "certificate stored");
        Ok(cert_id)
    }

    /// Apply a revocation. Guards:
    /// a hold may advance to a harder reason (keeping the hold's times);
    /// a repeated hold and any other currently-revoked state are rejected
    /// unless `force`.
    pub fn revoke_cert(
        &self,
        ca: &NameId,
        serial: &SerialNumber,
        rev_info: CertRevocationInfo,
        force: bool,
    ) -> Result<Option<CertWithRevInfo>> {
        let Some(current) = self.get_cert_with_rev_info(ca.id, serial)? else {
            warn!(ca = %ca.name, serial = %serial, "revocation target does not exist");
            return Ok(None);
        };

        let mut granted = rev_info;
        if let Some(current_rev) = current.rev_info {
            if current_rev.reason == CrlReason::CertificateHold {
                if granted.reason == CrlReason::CertificateHold && !force {
                    return Err(OperationError::cert_revoked(format!(
                        "certificate already revoked with the requested reason {}",
                        current_rev.reason.description()
                    )));
                }
                // the hold's times survive the upgrade
                granted.revocation_time = current_rev.revocation_time;
                granted.invalidity_time = current_rev.invalidity_time;
            } else if !force {
                return Err(OperationError::cert_revoked(format!(
                    "certificate already revoked with reason {}",
                    current_rev.reason.description()
                )));
            }
        }

        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE CERT SET LUPDATE=?1,REV=1,RT=?2,RIT=?3,RR=?4 WHERE ID=?5",
            params![
                now_seconds(),
                granted.revocation_time,
                granted.invalidity_time,
                granted.reason.code(),
                current.cert.cert_id,
            ],
        )?;
        expect_one_row(count)?;

        debug!(ca = %ca.name, serial = %serial, reason = granted.reason.description(), "certificate revoked");
        Ok(Some(CertWithRevInfo { rev_info: Some(granted), ..current }))
    }

    /// Advance a suspended (hold) certificate to a definitive reason.
    /// Rejected when the certificate is not currently on hold.
    pub fn revoke_suspended_cert(
        &self,
        ca: &NameId,
        serial: &SerialNumber,
        reason: CrlReason,
    ) -> Result<Option<CertWithRevInfo>> {
        let Some(current) = self.get_cert_with_rev_info(ca.id, serial)? else {
            warn!(ca = %ca.name, serial = %serial, "revocation target does not exist");
            return Ok(None);
        };

        let Some(current_rev) = current.rev_info else {
            return Err(OperationError::cert_unrevoked("certificate is not revoked"));
        };
        if current_rev.reason != CrlReason::CertificateHold {
            return Err(OperationError::cert_revoked(format!(
                "certificate is revoked but not with reason {}",
                CrlReason::CertificateHold.description()
            )));
        }

        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE CERT SET LUPDATE=?1,RR=?2 WHERE ID=?3",
            params![now_seconds(), reason.code(), current.cert.cert_id],
        )?;
        expect_one_row(count)?;

        let rev_info = CertRevocationInfo { reason, ..current_rev };
        Ok(Some(CertWithRevInfo { rev_info: Some(rev_info), ..current }))
    }

    /// Clear the revocation state. Only a hold may be lifted unless
    /// `force`.
    pub fn unrevoke_cert(
        &self,
        ca: &NameId,
        serial: &SerialNumber,
        force: bool,
    ) -> Result<Option<StoredCert>> {
        let Some(current) = self.get_cert_with_rev_info(ca.id, serial)? else {
            warn!(ca = %ca.name, serial = %serial, "unrevocation target does not exist");
            return Ok(None);
        };

        let Some(current_rev) = current.rev_info else {
            return Err(OperationError::cert_unrevoked("certificate is not revoked"));
        };
        if !force && current_rev.reason != CrlReason::CertificateHold {
            return Err(OperationError::not_permitted(format!(
                "could not unrevoke certificate revoked with reason {}",
                current_rev.reason.description()
            )));
        }

        let conn = self.conn()?;
        let count = conn.execute(
            "UPDATE CERT SET LUPDATE=?1,REV=0,RT=NULL,RIT=NULL,RR=NULL WHERE ID=?2",
            params![now_seconds(), current.cert.cert_id],
        )?;
        expect_one_row(count)?;

        Ok(Some(current.cert))
    }

    /// Hard-delete one certificate row.
    pub fn remove_cert(&self, ca: &NameId, serial: &SerialNumber) -> Result<()> {
        let conn = self.conn()?;
        let count = conn.execute(
            "DELETE FROM CERT WHERE CA_ID=?1 AND SN=?2",
            params![ca.id, serial.to_hex()],
        )?;
        expect_one_row(count)
    }

    pub fn get_cert_for_id(&self, cert_id: i64) -> Result<Option<CertInfo>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(&self.sql_cert_for_id, params![cert_id], |row| {
                Ok((
                    row.get::<_, i32>("PID")?,
                    row.get::<_, Option<i32>>("RID")?,
                    row.get::<_, bool>("REV")?,
                    row.get::<_, Option<i64>>("RR")?,
                    row.get::<_, Option<i64>>("RT")?,
                    row.get::<_, Option<i64>>("RIT")?,
                    row.get::<_, String>("CERT")?,
                ))
            })
            .optional()?;

        let Some((profile_id, requestor_id, revoked, rr, rt, rit, b64_cert)) = row else {
            return Ok(None);
        };
        Ok(Some(CertInfo {
            cert: StoredCert { cert_id, cert: decode_cert(&b64_cert)? },
            profile_id,
            requestor_id,
            rev_info: decode_rev_info(revoked, rr, rt, rit)?,
        }))
    }

    pub fn get_cert_with_rev_info(
        &self,
        ca_id: i32,
        serial: &SerialNumber,
    ) -> Result<Option<CertWithRevInfo>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &self.sql_cert_with_rev_info,
                params![ca_id, serial.to_hex()],
                |row| {
                    Ok((
                        row.get::<_, i64>("ID")?,
                        row.get::<_, bool>("REV")?,
                        row.get::<_, Option<i64>>("RR")?,
                        row.get::<_, Option<i64>>("RT")?,
                        row.get::<_, Option<i64>>("RIT")?,
                        row.get::<_, i32>("PID")?,
                        row.get::<_, String>("CERT")?,
                    ))
                },
            )
            .optional()?;

        let Some((cert_id, revoked, rr, rt, rit, profile_id, b64_cert)) = row else {
            return Ok(None);
        };
        Ok(Some(CertWithRevInfo {
            cert: StoredCert { cert_id, cert: decode_cert(&b64_cert)? },
            profile_id,
            rev_info: decode_rev_info(revoked, rr, rt, rit)?,
        }))
    }

    pub fn get_cert_info(&self, ca: &NameId, serial: &SerialNumber) -> Result<Option<CertInfo>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(&self.sql_cert_info, params![ca.id, serial.to_hex()], |row| {
                Ok((
                    row.get::<_, i64>("ID")?,
                    row.get::<_, i32>("PID")?,
                    row.get::<_, Option<i32>>("RID")?,
                    row.get::<_, bool>("REV")?,
                    row.get::<_, Option<i64>>("RR")?,
                    row.get::<_, Option<i64>>("RT")?,
                    row.get::<_, Option<i64>>("RIT")?,
                    row.get::<_, String>("CERT")?,
                ))
            })
            .optional()?;

        let Some((cert_id, profile_id, requestor_id, revoked, rr, rt, rit, b64_cert)) = row else {
            return Ok(None);
        };
        Ok(Some(CertInfo {
            cert: StoredCert { cert_id, cert: decode_cert(&b64_cert)? },
            profile_id,
            requestor_id,
            rev_info: decode_rev_info(revoked, rr, rt, rit)?,
        }))
    }

    /// Whether any certificate with this serial was issued by the CA.
    pub fn knows_cert_for_serial(&self, ca: &NameId, serial: &SerialNumber) -> Result<KnownCertResult> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT UID FROM CERT WHERE SN=?1 AND CA_ID=?2",
                params![serial.to_hex(), ca.id],
                |row| row.get::<_, Option<i32>>(0),
            )
            .optional()?;
        Ok(match row {
            None => KnownCertResult::UNKNOWN,
            Some(user_id) => KnownCertResult { known: true, user_id },
        })
    }

    pub fn get_count_of_certs(&self, ca: &NameId, only_revoked: bool) -> Result<i64> {
        let sql = if only_revoked {
            "SELECT COUNT(*) FROM CERT WHERE CA_ID=?1 AND REV=1"
        } else {
            "SELECT COUNT(*) FROM CERT WHERE CA_ID=?1"
        };
        let conn = self.conn()?;
        Ok(conn.query_row(sql, params![ca.id], |row| row.get(0))?)
    }

    /// Status of the newest certificate for a canonical subject.
    pub fn get_cert_status_for_subject(&self, ca: &NameId, subject: &X500Name) -> Result<CertStatus> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT REV FROM CERT WHERE FP_S=?1 AND CA_ID=?2",
                params![subject.canonical_fingerprint(), ca.id],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;
        Ok(match row {
            None => CertStatus::Unknown,
            Some(true) => CertStatus::Revoked,
            Some(false) => CertStatus::Good,
        })
    }

    pub fn is_cert_for_subject_issued(&self, ca: &NameId, subject_fp: i64) -> Result<bool> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT ID FROM CERT WHERE CA_ID=?1 AND FP_S=?2",
                params![ca.id, subject_fp],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .is_some())
    }

    // ------------------------------------------------------------------
    // paginated scans

    /// Serials in ascending id order starting just past `start_id`.
    pub fn get_serial_numbers(
        &self,
        ca: &NameId,
        start_id: i64,
        limit: usize,
        only_revoked: bool,
    ) -> Result<Vec<SerialWithId>> {
        let sql = self.sql_serials(limit, only_revoked)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![start_id - 1, ca.id], |row| {
            Ok((row.get::<_, i64>("ID")?, row.get::<_, String>("SN")?))
        })?;
        collect_serials(rows)
    }

    /// The filtered variant: optional expiry cutoff and CA/EE filter.
    /// `only_ca_certs` and `only_ee_certs` are mutually exclusive.
    #[allow(clippy::too_many_arguments)]
    pub fn get_serial_numbers_filtered(
        &self,
        ca: &NameId,
        not_expired_at: Option<i64>,
        start_id: i64,
        limit: usize,
        only_revoked: bool,
        only_ca_certs: bool,
        only_ee_certs: bool,
    ) -> Result<Vec<SerialWithId>> {
        if only_ca_certs && only_ee_certs {
            return Err(OperationError::bad_request(
                "onlyCaCerts and onlyEeCerts cannot both be set",
            ));
        }
        let with_ee = only_ca_certs || only_ee_certs;
        let core = format!(
            "ID,SN FROM CERT WHERE ID>?1 AND CA_ID=?2{}{}{}",
            if not_expired_at.is_some() { " AND NAFTER>?3" } else { "" },
            if only_revoked { " AND REV=1" } else { "" },
            if with_ee {
                if not_expired_at.is_some() { " AND EE=?4" } else { " AND EE=?3" }
            } else {
                ""
            },
        );
        let sql = self.dialect.build_select_first_sql(limit, Some("ID ASC"), &core);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let map = |row: &rusqlite::Row<'_>| {
            Ok((row.get::<_, i64>("ID")?, row.get::<_, String>("SN")?))
        };
        let ee = only_ee_certs as i32;
        let rows = match (not_expired_at, with_ee) {
            (Some(at), true) => stmt.query_map(params![start_id - 1, ca.id, at + 1, ee], map)?,
            (Some(at), false) => stmt.query_map(params![start_id - 1, ca.id, at + 1], map)?,
            (None, true) => stmt.query_map(params![start_id - 1, ca.id, ee], map)?,
            (None, false) => stmt.query_map(params![start_id - 1, ca.id], map)?,
        };
        collect_serials(rows)
    }

    pub fn get_expired_serial_numbers(
        &self,
        ca: &NameId,
        expired_at: i64,
        limit: usize,
    ) -> Result<Vec<SerialNumber>> {
        let sql = cached_sql(&self.cache_sql_expired_serials, limit, || {
            self.dialect.build_select_first_sql(
                limit,
                None,
                "SN FROM CERT WHERE CA_ID=?1 AND NAFTER<?2",
            )
        })?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![ca.id, expired_at], |row| row.get::<_, String>("SN"))?;
        let mut out = Vec::new();
        for sn in rows {
            out.push(parse_serial(&sn?)?);
        }
        Ok(out)
    }

    /// Serials still on hold whose last update predates `latest_update`.
    pub fn get_suspended_cert_serials(
        &self,
        ca: &NameId,
        latest_update: i64,
        limit: usize,
    ) -> Result<Vec<SerialNumber>> {
        let sql = cached_sql(&self.cache_sql_suspended_serials, limit, || {
            self.dialect.build_select_first_sql(
                limit,
                None,
                "SN FROM CERT WHERE CA_ID=?1 AND LUPDATE<?2 AND RR=?3",
            )
        })?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![ca.id, latest_update + 1, CrlReason::CertificateHold.code()],
            |row| row.get::<_, String>("SN"),
        )?;
        let mut out = Vec::new();
        for sn in rows {
            out.push(parse_serial(&sn?)?);
        }
        Ok(out)
    }

    /// Revoked, unexpired certificates in ascending id order.
    pub fn get_revoked_certs(
        &self,
        ca: &NameId,
        not_expired_at: i64,
        start_id: i64,
        limit: usize,
    ) -> Result<Vec<CertRevInfoWithSerial>> {
        let sql = cached_sql(&self.cache_sql_revoked_certs, limit, || {
            self.dialect.build_select_first_sql(
                limit,
                Some("ID ASC"),
                "ID,SN,RR,RT,RIT FROM CERT WHERE ID>?1 AND CA_ID=?2 AND REV=1 AND NAFTER>?3",
            )
        })?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![start_id - 1, ca.id, not_expired_at + 1], |row| {
            Ok((
                row.get::<_, i64>("ID")?,
                row.get::<_, String>("SN")?,
                row.get::<_, i64>("RR")?,
                row.get::<_, i64>("RT")?,
                row.get::<_, Option<i64>>("RIT")?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, sn, rr, rt, rit) = row?;
            out.push(CertRevInfoWithSerial {
                id,
                serial: parse_serial(&sn)?,
                rev_info: CertRevocationInfo {
                    reason: parse_reason(rr)?,
                    revocation_time: rt,
                    invalidity_time: rit.filter(|v| *v != 0),
                },
            });
        }
        Ok(out)
    }

    /// Entries for a delta CRL relative to `base_crl_number`: members of
    /// the base CRL that are no longer revoked (reported as
    /// `removeFromCRL`) plus certificates revoked since the base CRL's
    /// thisUpdate that the base does not already list.
    pub fn get_certs_for_delta_crl(
        &self,
        ca: &NameId,
        base_crl_number: u64,
        not_expired_at: i64,
    ) -> Result<Vec<CertRevInfoWithSerial>> {
        let base_der = self
            .get_encoded_crl(ca, Some(base_crl_number))?
            .ok_or_else(|| {
                OperationError::crl_failure(format!("base CRL {base_crl_number} not found"))
            })?;
        let base = CrlInfo::parse(&base_der)
            .map_err(|err| OperationError::crl_failure(format!("unreadable base CRL: {err}")))?;

        let base_serials: std::collections::HashSet<SerialNumber> =
            base.revoked_serials.iter().cloned().collect();

        let mut entries = Vec::new();

        // base members that have been unrevoked since
        {
            let conn = self.conn()?;
            for serial in &base.revoked_serials {
                let unrevoked_at = conn
                    .query_row(
                        &self.sql_select_unrevoked_sn,
                        params![ca.id, serial.to_hex()],
                        |row| row.get::<_, i64>("LUPDATE"),
                    )
                    .optional()?;
                if let Some(lupdate) = unrevoked_at {
                    entries.push(CertRevInfoWithSerial {
                        id: 0,
                        serial: serial.clone(),
                        rev_info: CertRevocationInfo {
                            reason: CrlReason::RemoveFromCrl,
                            revocation_time: lupdate,
                            invalidity_time: None,
                        },
                    });
                }
            }
        }

        // revoked since the base CRL; -1 keeps entries whose last update
        // equals the base thisUpdate
        let updated_since = base.this_update - 1;
        let page = 1000;
        let mut start_id = 1i64;
        loop {
            let core =
                "ID,SN,RR,RT,RIT FROM CERT WHERE ID>?1 AND CA_ID=?2 AND REV=1 AND NAFTER>?3 AND LUPDATE>?4";
            let sql = self.dialect.build_select_first_sql(page, Some("ID ASC"), core);
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![start_id - 1, ca.id, not_expired_at + 1, updated_since],
                |row| {
                    Ok((
                        row.get::<_, i64>("ID")?,
                        row.get::<_, String>("SN")?,
                        row.get::<_, i64>("RR")?,
                        row.get::<_, i64>("RT")?,
                        row.get::<_, Option<i64>>("RIT")?,
                    ))
                },
            )?;

            let mut num = 0usize;
            for row in rows {
                let (id, sn, rr, rt, rit) = row?;
                num += 1;
                if id >= start_id {
                    start_id = id + 1;
                }
                let serial = parse_serial(&sn)?;
                if base_serials.contains(&serial) {
                    // unchanged since the base CRL
                    continue;
                }
                entries.push(CertRevInfoWithSerial {
                    id,
                    serial,
                    rev_info: CertRevocationInfo {
                        reason: parse_reason(rr)?,
                        revocation_time: rt,
                        invalidity_time: rit.filter(|v| *v != 0),
                    },
                });
            }
            if num < page {
                break;
            }
        }

        Ok(entries)
    }

    /// For subjects that encode device serials in a DN component: the
    /// `serialNumber` RDN value of the newest matching subject.
    pub fn get_latest_serial_for_subject_like(&self, name_with_serial: &X500Name) -> Result<Option<String>> {
        let pattern = name_with_serial.with_serial_wildcard().to_text();
        let conn = self.conn()?;
        let subject = conn
            .query_row(&self.sql_latest_serial_for_subject_like, params![pattern], |row| {
                row.get::<_, String>("SUBJECT")
            })
            .optional()?;
        let Some(subject) = subject else { return Ok(None) };
        let parsed = X500Name::parse_text(&subject)
            .map_err(|_| OperationError::system_failure("unparsable stored subject"))?;
        Ok(parsed.values_of(crate::asn1::oids::DN_SERIAL_NUMBER).first().map(|v| v.to_string()))
    }

    /// Certificate listing with optional subject pattern (`*` wildcards)
    /// and validity window.
    pub fn list_certs(
        &self,
        ca: &NameId,
        subject_pattern: Option<&X500Name>,
        valid_from: Option<i64>,
        valid_to: Option<i64>,
        order_by: Option<CertListOrderBy>,
        limit: usize,
    ) -> Result<Vec<CertListEntry>> {
        use rusqlite::types::Value;

        let mut core = String::from("SN,NBEFORE,NAFTER,SUBJECT FROM CERT WHERE CA_ID=?1");
        let mut values: Vec<Value> = vec![Value::from(i64::from(ca.id))];

        if let Some(valid_from) = valid_from {
            core.push_str(&format!(" AND NBEFORE<?{}", values.len() + 1));
            values.push(Value::from(valid_from - 1));
        }
        if let Some(valid_to) = valid_to {
            core.push_str(&format!(" AND NAFTER>?{}", values.len() + 1));
            values.push(Value::from(valid_to));
        }
        if let Some(pattern) = subject_pattern {
            let text = pattern.to_text();
            if text.contains('%') {
                return Err(OperationError::bad_request(
                    "the character '%' is not allowed in subjectPattern",
                ));
            }
            core.push_str(&format!(" AND SUBJECT LIKE ?{}", values.len() + 1));
            values.push(Value::from(format!("%{}%", text.replace('*', "%"))));
        }

        let sql = self.dialect.build_select_first_sql(limit, order_by.map(CertListOrderBy::sql), &core);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt.query_map(rusqlite::params_from_iter(values), |row| {
            Ok((
                row.get::<_, String>("SN")?,
                row.get::<_, String>("SUBJECT")?,
                row.get::<_, i64>("NBEFORE")?,
                row.get::<_, i64>("NAFTER")?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (sn, subject, not_before, not_after) = row?;
            out.push(CertListEntry { serial: parse_serial(&sn)?, subject, not_before, not_after });
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // CRLs

    pub fn has_crl(&self, ca: &NameId) -> Result<bool> {
        let conn = self.conn()?;
        Ok(conn
            .query_row("SELECT ID FROM CRL WHERE CA_ID=?1 LIMIT 1", params![ca.id], |row| {
                row.get::<_, i64>(0)
            })
            .optional()?
            .is_some())
    }

    /// Persist a signed CRL; number and delta metadata are read from the
    /// DER itself.
    pub fn add_crl(&self, ca: &NameId, crl_der: &[u8]) -> Result<()> {
        let info = CrlInfo::parse(crl_der)
            .map_err(|err| OperationError::crl_failure(format!("unreadable CRL: {err}")))?;

        let conn = self.conn()?;
        let max_id: i64 = conn
            .query_row("SELECT COALESCE(MAX(ID),0) FROM CRL", [], |row| row.get(0))?;
        conn.execute(
            "INSERT INTO CRL (ID,CA_ID,CRL_NO,THISUPDATE,NEXTUPDATE,DELTACRL,BASECRL_NO,CRL_SCOPE,CRL) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,0,?8)",
            params![
                max_id + 1,
                ca.id,
                info.crl_number.map(|n| n as i64),
                info.this_update,
                info.next_update,
                info.base_crl_number.is_some() as i32,
                info.base_crl_number.map(|n| n as i64),
                BASE64.encode(crl_der),
            ],
        )?;
        Ok(())
    }

    /// The latest CRL, or the CRL with a specific number.
    pub fn get_encoded_crl(&self, ca: &NameId, crl_number: Option<u64>) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let b64 = match crl_number {
            None => conn
                .query_row(&self.sql_crl_latest, params![ca.id], |row| row.get::<_, String>("CRL"))
                .optional()?,
            Some(number) => conn
                .query_row(&self.sql_crl_with_no, params![ca.id, number as i64], |row| {
                    row.get::<_, String>("CRL")
                })
                .optional()?,
        };
        match b64 {
            None => Ok(None),
            Some(b64) => Ok(Some(BASE64.decode(b64.as_bytes()).map_err(|_| {
                OperationError::system_failure("stored CRL is not valid base64")
            })?)),
        }
    }

    /// Highest CRL number, optionally over full CRLs only. Zero when no
    /// CRL exists yet.
    pub fn get_max_crl_number(&self, ca: &NameId, full_only: bool) -> Result<u64> {
        let sql = if full_only {
            "SELECT MAX(CRL_NO) FROM CRL WHERE CA_ID=?1 AND DELTACRL=0"
        } else {
            "SELECT MAX(CRL_NO) FROM CRL WHERE CA_ID=?1"
        };
        let conn = self.conn()?;
        let max: Option<i64> = conn.query_row(sql, params![ca.id], |row| row.get(0))?;
        Ok(max.map(|v| v.max(0) as u64).unwrap_or(0))
    }

    pub fn get_this_update_of_current_crl(&self, ca: &NameId, delta: bool) -> Result<i64> {
        let conn = self.conn()?;
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(THISUPDATE) FROM CRL WHERE CA_ID=?1 AND DELTACRL=?2",
            params![ca.id, delta as i32],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0))
    }

    /// Keep the newest `keep` full CRLs; everything older (including the
    /// deltas between them) is deleted. Returns the number of full CRLs
    /// dropped.
    pub fn cleanup_crls(&self, ca: &NameId, keep: usize) -> Result<usize> {
        if keep == 0 {
            return Err(OperationError::bad_request("keep must be positive"));
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT CRL_NO FROM CRL WHERE CA_ID=?1 AND DELTACRL=0")?;
        let mut numbers: Vec<i64> = stmt
            .query_map(params![ca.id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        numbers.sort_unstable();
        if numbers.len() <= keep {
            return Ok(0);
        }
        let to_delete = numbers.len() - keep;
        let cutoff = numbers[to_delete - 1];
        conn.execute(
            "DELETE FROM CRL WHERE CA_ID=?1 AND CRL_NO<?2",
            params![ca.id, cutoff + 1],
        )?;
        Ok(to_delete)
    }

    // ------------------------------------------------------------------
    // publish queue

    pub fn add_to_publish_queue(&self, publisher: &NameId, ca: &NameId, cert_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO PUBLISHQUEUE (PID,CA_ID,CID) VALUES (?1,?2,?3)",
            params![publisher.id, ca.id, cert_id],
        )?;
        Ok(())
    }

    pub fn remove_from_publish_queue(&self, publisher: &NameId, cert_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM PUBLISHQUEUE WHERE PID=?1 AND CID=?2",
            params![publisher.id, cert_id],
        )?;
        Ok(())
    }

    pub fn clear_publish_queue(&self, ca: Option<&NameId>, publisher: Option<&NameId>) -> Result<()> {
        let conn = self.conn()?;
        match (ca, publisher) {
            (Some(ca), Some(publisher)) => conn.execute(
                "DELETE FROM PUBLISHQUEUE WHERE CA_ID=?1 AND PID=?2",
                params![ca.id, publisher.id],
            )?,
            (Some(ca), None) => {
                conn.execute("DELETE FROM PUBLISHQUEUE WHERE CA_ID=?1", params![ca.id])?
            }
            (None, Some(publisher)) => {
                conn.execute("DELETE FROM PUBLISHQUEUE WHERE PID=?1", params![publisher.id])?
            }
            (None, None) => conn.execute("DELETE FROM PUBLISHQUEUE", [])?,
        };
        Ok(())
    }

    /// Queued certificate ids for one publisher, smallest first.
    pub fn get_publish_queue_entries(
        &self,
        ca: &NameId,
        publisher: &NameId,
        limit: usize,
    ) -> Result<Vec<i64>> {
        let sql = cached_sql(&self.cache_sql_cid_from_publish_queue, limit, || {
            self.dialect.build_select_first_sql(
                limit,
                Some("CID ASC"),
                "CID FROM PUBLISHQUEUE WHERE PID=?1 AND CA_ID=?2",
            )
        })?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![publisher.id, ca.id], |row| row.get::<_, i64>("CID"))?;
        let mut out = Vec::new();
        for id in rows {
            let id = id?;
            if !out.contains(&id) {
                out.push(id);
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // request archive

    pub fn add_request(&self, request: &[u8]) -> Result<i64> {
        let id = self.id_generator.next_id();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO REQUEST (ID,LUPDATE,DATA) VALUES (?1,?2,?3)",
            params![id, now_seconds(), BASE64.encode(request)],
        )?;
        Ok(id)
    }

    pub fn add_request_cert(&self, request_id: i64, cert_id: i64) -> Result<()> {
        let id = self.id_generator.next_id();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO REQCERT (ID,RID,CID) VALUES (?1,?2,?3)",
            params![id, request_id, cert_id],
        )?;
        Ok(())
    }

    /// The archived enrollment request for an issued certificate.
    pub fn get_cert_request(&self, ca: &NameId, serial: &SerialNumber) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let req_id: Option<i64> = conn
            .query_row(
                "SELECT REQCERT.RID FROM REQCERT INNER JOIN CERT \
                 ON CERT.CA_ID=?1 AND CERT.SN=?2 AND REQCERT.CID=CERT.ID",
                params![ca.id, serial.to_hex()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(req_id) = req_id else { return Ok(None) };
        let b64: Option<String> = conn
            .query_row("SELECT DATA FROM REQUEST WHERE ID=?1", params![req_id], |row| row.get(0))
            .optional()?;
        match b64 {
            None => Ok(None),
            Some(b64) => Ok(Some(BASE64.decode(b64.as_bytes()).map_err(|_| {
                OperationError::system_failure("stored request is not valid base64")
            })?)),
        }
    }

    pub fn delete_unreferenced_requests(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM REQUEST WHERE ID NOT IN (SELECT RID FROM REQCERT)",
            [],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // system events

    pub fn get_system_event(&self, name: &str) -> Result<Option<SystemEvent>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT EVENT_TIME,EVENT_OWNER FROM SYSTEM_EVENT WHERE NAME=?1",
                params![name],
                |row| {
                    Ok(SystemEvent {
                        name: name.to_string(),
                        event_time: row.get(0)?,
                        owner: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    })
                },
            )
            .optional()?)
    }

    pub fn set_system_event(&self, event: &SystemEvent) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO SYSTEM_EVENT (NAME,EVENT_TIME,EVENT_OWNER) VALUES (?1,?2,?3)",
            params![event.name, event.event_time, event.owner],
        )?;
        Ok(())
    }

    /// Cheap probe used by health endpoints.
    pub fn is_healthy(&self) -> bool {
        match self.conn() {
            Ok(conn) => conn
                .query_row("SELECT ID FROM CA LIMIT 1", [], |row| row.get::<_, i64>(0))
                .optional()
                .is_ok(),
            Err(err) => {
                warn!("health check failed: {err}");
                false
            }
        }
    }

    // ------------------------------------------------------------------

    fn sql_serials(&self, limit: usize, only_revoked: bool) -> Result<String> {
        let cache = if only_revoked { &self.cache_sql_serials_revoked } else { &self.cache_sql_serials };
        cached_sql(cache, limit, || {
            let core = if only_revoked {
                "ID,SN FROM CERT WHERE ID>?1 AND CA_ID=?2 AND REV=1"
            } else {
                "ID,SN FROM CERT WHERE ID>?1 AND CA_ID=?2"
            };
            self.dialect.build_select_first_sql(limit, Some("ID ASC"), core)
        })
    }
}

fn cached_sql(cache: &SqlCache, key: usize, build: impl FnOnce() -> String) -> Result<String> {
    let mut guard = cache
        .lock()
        .map_err(|_| OperationError::system_failure("sql cache poisoned"))?;
    if let Some(sql) = guard.get(&key) {
        return Ok(sql.clone());
    }
    let sql = build();
    guard.put(key, sql.clone());
    Ok(sql)
}

fn now_seconds() -> i64 {
    Utc::now().timestamp()
}

fn expect_one_row(count: usize) -> Result<()> {
    if count == 1 {
        Ok(())
    } else if count > 1 {
        Err(OperationError::system_failure(format!(
            "{count} rows modified, but exactly one is expected"
        )))
    } else {
        Err(OperationError::system_failure(
            "no row is modified, but exactly one is expected",
        ))
    }
}

fn decode_cert(b64: &str) -> Result<X509Cert> {
    let der = BASE64
        .decode(b64.as_bytes())
        .map_err(|_| OperationError::system_failure("stored certificate is not valid base64"))?;
    X509Cert::parse(der)
        .map_err(|err| OperationError::system_failure(format!("stored certificate unreadable: {err}")))
}

fn decode_rev_info(
    revoked: bool,
    rr: Option<i64>,
    rt: Option<i64>,
    rit: Option<i64>,
) -> Result<Option<CertRevocationInfo>> {
    if !revoked {
        return Ok(None);
    }
    let reason = parse_reason(rr.unwrap_or(0))?;
    let revocation_time = rt.unwrap_or(0);
    let invalidity_time = rit.filter(|v| *v != 0 && Some(*v) != rt);
    Ok(Some(CertRevocationInfo { reason, revocation_time, invalidity_time }))
}

fn parse_reason(code: i64) -> Result<CrlReason> {
    u8::try_from(code)
        .ok()
        .and_then(CrlReason::from_code)
        .ok_or_else(|| OperationError::system_failure(format!("invalid revocation reason {code}")))
}

fn parse_serial(hex_text: &str) -> Result<SerialNumber> {
    SerialNumber::from_hex(hex_text)
        .ok_or_else(|| OperationError::system_failure(format!("invalid stored serial {hex_text}")))
}

fn collect_serials<I>(rows: I) -> Result<Vec<SerialWithId>>
where
    I: Iterator<Item = rusqlite::Result<(i64, String)>>,
{
    let mut out = Vec::new();
    for row in rows {
        let (id, sn) = row?;
        out.push(SerialWithId { id, serial: parse_serial(&sn)? });
    }
    Ok(out)
}
