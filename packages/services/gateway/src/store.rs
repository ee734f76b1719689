//! 자격 증명 저장소 (SQLite)
//!
//! 모든 레코드를 소유하며, 모든 변경은 저장소 전역 쓰기 잠금 아래 트랜잭션으로 수행됩니다.
//! 레코드는 물리적으로 삭제되지 않습니다.

use std::path::Path as FsPath;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;

use kg_core::auth::{
    derive_identity, generate_secret, validate_custom_secret, Credential, CredentialIdentity,
    CredentialOrigin, IssuedCredential, NewCredential, PermissionSet, SecretHasher,
};

use crate::error::{GatewayError, Result};

const LEGACY_SERVICE: &str = "legacy";

#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
    hasher: SecretHasher,
    write_lock: Arc<Mutex<()>>,
}

/// 목록 필터
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub active_only: bool,
    pub service: Option<String>,
}

/// 레거시 가져오기 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

/// 저장소 상태
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub backend: &'static str,
    pub healthy: bool,
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub legacy: i64,
    pub managed: i64,
}

/// 감사 로그 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Imported,
    Deactivated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Imported => "imported",
            AuditAction::Deactivated => "deactivated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(AuditAction::Created),
            "imported" => Some(AuditAction::Imported),
            "deactivated" => Some(AuditAction::Deactivated),
            _ => None,
        }
    }
}

/// 감사 로그 항목
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: String,
    pub identity: CredentialIdentity,
    pub action: AuditAction,
    pub detail: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl CredentialStore {
    /// URL로 연결 후 스키마 초기화
    pub async fn connect(db_url: &str, hasher: SecretHasher) -> anyhow::Result<Self> {
        let in_memory = db_url.contains(":memory:");

        let options = if in_memory {
            SqliteConnectOptions::from_str(db_url)?
        } else if let Some(path) = db_url.strip_prefix("sqlite:///") {
            let abs_path = FsPath::new("/").join(path);
            if let Some(parent) = abs_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            SqliteConnectOptions::new()
                .filename(abs_path)
                .create_if_missing(true)
        } else if let Some(path) = db_url.strip_prefix("sqlite://") {
            if let Some(parent) = FsPath::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        } else {
            SqliteConnectOptions::from_str(db_url)?.create_if_missing(true)
        };

        // 메모리 DB는 연결마다 별도 DB이므로 단일 연결을 유지
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;

        let store = Self {
            pool,
            hasher,
            write_lock: Arc::new(Mutex::new(())),
        };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> anyhow::Result<()> {
        let queries = [
            r#"CREATE TABLE IF NOT EXISTS credentials (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                identity TEXT NOT NULL UNIQUE,
                secret_digest TEXT NOT NULL,
                display_name TEXT NOT NULL,
                service_scope TEXT NOT NULL,
                permissions TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                origin TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_used_at TEXT,
                usage_count INTEGER NOT NULL DEFAULT 0,
                expires_at TEXT,
                deactivated_at TEXT,
                deactivation_reason TEXT,
                last_used_ip TEXT
            );"#,
            r#"CREATE INDEX IF NOT EXISTS idx_credentials_service ON credentials (service_scope);"#,
            r#"CREATE TABLE IF NOT EXISTS audit_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                identity TEXT NOT NULL,
                action TEXT NOT NULL,
                detail TEXT NOT NULL,
                at TEXT NOT NULL
            );"#,
        ];

        for q in queries {
            sqlx::query(q).execute(&self.pool).await?;
        }

        Ok(())
    }

    pub fn hasher(&self) -> &SecretHasher {
        &self.hasher
    }

    /// Argon2 연산은 blocking 스레드에서 수행
    async fn hash_secret(&self, secret: String) -> Result<String> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| GatewayError::Internal {
                message: format!("hashing task failed: {e}"),
            })?
            .map_err(GatewayError::from)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// 자격 증명 생성
    ///
    /// 평문 시크릿은 반환값으로 한 번만 노출됩니다.
    pub async fn create(&self, new: NewCredential) -> Result<IssuedCredential> {
        let secret = match new.custom_secret {
            Some(custom) => {
                validate_custom_secret(&custom)?;
                custom
            }
            None => generate_secret(),
        };
        let identity = derive_identity(&secret);
        let digest = self.hash_secret(secret.clone()).await?;
        let created_at = Utc::now();

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        if identity_exists(&mut tx, &identity).await? {
            return Err(kg_core::Error::DuplicateIdentity {
                identity: identity.to_string(),
            }
            .into());
        }

        insert_credential(
            &mut tx,
            &identity,
            &digest,
            &new.display_name,
            &new.service_scope,
            &new.permissions,
            CredentialOrigin::Managed,
            created_at,
            new.expires_at,
        )
        .await?;

        insert_audit(
            &mut tx,
            &identity,
            AuditAction::Created,
            serde_json::json!({
                "name": new.display_name,
                "service": new.service_scope,
                "permissions": new.permissions,
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            identity = %identity.masked(),
            service = %new.service_scope,
            "Created credential"
        );

        Ok(IssuedCredential {
            credential: Credential {
                identity,
                display_name: new.display_name,
                service_scope: new.service_scope,
                permissions: new.permissions,
                is_active: true,
                origin: CredentialOrigin::Managed,
                created_at,
                last_used_at: None,
                usage_count: 0,
                expires_at: new.expires_at,
                deactivated_at: None,
                deactivation_reason: None,
                last_used_ip: None,
            },
            secret,
        })
    }

    /// 레거시 평문 키 가져오기
    ///
    /// 이미 존재하는 identity는 건너뛰므로 재시작마다 호출해도 중복되지 않습니다.
    pub async fn import_legacy(&self, secrets: &[String]) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        for (i, secret) in secrets.iter().enumerate() {
            let secret = secret.trim();
            if secret.is_empty() {
                continue;
            }
            let identity = derive_identity(secret);

            let _guard = self.write_lock.lock().await;
            let mut tx = self.pool.begin().await?;

            if identity_exists(&mut tx, &identity).await? {
                report.skipped += 1;
                continue;
            }

            let digest = self.hash_secret(secret.to_string()).await?;
            let name = format!("Legacy Key {}", i + 1);

            insert_credential(
                &mut tx,
                &identity,
                &digest,
                &name,
                LEGACY_SERVICE,
                &PermissionSet::admin(),
                CredentialOrigin::Legacy,
                Utc::now(),
                None,
            )
            .await?;

            insert_audit(
                &mut tx,
                &identity,
                AuditAction::Imported,
                serde_json::json!({ "name": name }),
            )
            .await?;

            tx.commit().await?;
            report.imported += 1;
        }

        if report.imported > 0 || report.skipped > 0 {
            tracing::info!(
                imported = report.imported,
                skipped = report.skipped,
                "Legacy credential import finished"
            );
        }

        Ok(report)
    }

    /// 사용 기록
    ///
    /// 활성 레코드만 갱신합니다. 갱신된 행이 없으면 `false`를 반환합니다.
    pub async fn record_usage(
        &self,
        identity: &CredentialIdentity,
        client_ip: Option<&str>,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"UPDATE credentials
               SET usage_count = usage_count + 1, last_used_at = ?1, last_used_ip = COALESCE(?2, last_used_ip)
               WHERE identity = ?3 AND is_active = 1"#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(client_ip)
        .bind(identity.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 비활성화 (재활성화 불가)
    pub async fn deactivate(
        &self,
        identity: &CredentialIdentity,
        reason: Option<&str>,
    ) -> Result<Credential> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, CredentialRow>(&select_sql("WHERE identity = ?1"))
            .bind(identity.as_str())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Err(kg_core::Error::NotFound {
                identity: identity.to_string(),
            }
            .into());
        };
        if !row.is_active {
            return Err(kg_core::Error::AlreadyInactive {
                identity: identity.to_string(),
            }
            .into());
        }

        let now = Utc::now();
        sqlx::query(
            r#"UPDATE credentials SET is_active = 0, deactivated_at = ?1, deactivation_reason = ?2
               WHERE identity = ?3"#,
        )
        .bind(now.to_rfc3339())
        .bind(reason)
        .bind(identity.as_str())
        .execute(&mut *tx)
        .await?;

        insert_audit(
            &mut tx,
            identity,
            AuditAction::Deactivated,
            serde_json::json!({ "reason": reason }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(identity = %identity.masked(), "Deactivated credential");

        let mut credential = row.into_credential()?;
        credential.is_active = false;
        credential.deactivated_at = Some(now);
        credential.deactivation_reason = reason.map(str::to_string);
        Ok(credential)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn find_by_identity(&self, identity: &CredentialIdentity) -> Result<Credential> {
        self.fetch_with_digest(identity)
            .await?
            .map(|(credential, _)| credential)
            .ok_or_else(|| {
                kg_core::Error::NotFound {
                    identity: identity.to_string(),
                }
                .into()
            })
    }

    /// 검증용 조회 (다이제스트 포함). 크레이트 밖으로 노출하지 않습니다.
    pub(crate) async fn fetch_with_digest(
        &self,
        identity: &CredentialIdentity,
    ) -> Result<Option<(Credential, String)>> {
        let row = sqlx::query_as::<_, CredentialRow>(&select_sql("WHERE identity = ?1"))
            .bind(identity.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let digest = row.secret_digest.clone();
                Ok(Some((row.into_credential()?, digest)))
            }
            None => Ok(None),
        }
    }

    /// 삽입 순서대로 목록 조회
    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<Credential>> {
        let rows = sqlx::query_as::<_, CredentialRow>(&select_sql(
            "WHERE (?1 = 0 OR is_active = 1) AND (?2 IS NULL OR service_scope = ?2) ORDER BY seq ASC",
        ))
        .bind(filter.active_only)
        .bind(filter.service.as_deref())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CredentialRow::into_credential).collect()
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    pub async fn status(&self) -> Result<StoreStatus> {
        let (total, active, legacy): (i64, i64, i64) = sqlx::query_as(
            r#"SELECT COUNT(*),
                      COALESCE(SUM(CASE WHEN is_active = 1 THEN 1 ELSE 0 END), 0),
                      COALESCE(SUM(CASE WHEN origin = 'legacy' THEN 1 ELSE 0 END), 0)
               FROM credentials"#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStatus {
            backend: "sqlite",
            healthy: true,
            total,
            active,
            inactive: total - active,
            legacy,
            managed: total - legacy,
        })
    }

    /// 최신순 감사 로그
    pub async fn audit_log(&self, limit: u32) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"SELECT id, identity, action, detail, at FROM audit_log ORDER BY seq DESC LIMIT ?1"#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditRow::into_event).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Query helpers
// ─────────────────────────────────────────────────────────────────────────────

fn select_sql(tail: &str) -> String {
    format!(
        r#"SELECT identity, secret_digest, display_name, service_scope, permissions, is_active, origin,
                  created_at, last_used_at, usage_count, expires_at, deactivated_at, deactivation_reason,
                  last_used_ip
           FROM credentials {tail}"#
    )
}

async fn identity_exists(
    tx: &mut Transaction<'_, Sqlite>,
    identity: &CredentialIdentity,
) -> Result<bool> {
    let found: Option<(i64,)> = sqlx::query_as(r#"SELECT 1 FROM credentials WHERE identity = ?1"#)
        .bind(identity.as_str())
        .fetch_optional(&mut **tx)
        .await?;
    Ok(found.is_some())
}

#[allow(clippy::too_many_arguments)]
async fn insert_credential(
    tx: &mut Transaction<'_, Sqlite>,
    identity: &CredentialIdentity,
    digest: &str,
    display_name: &str,
    service_scope: &str,
    permissions: &PermissionSet,
    origin: CredentialOrigin,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let permissions_json = serde_json::to_string(permissions).map_err(kg_core::Error::from)?;

    sqlx::query(
        r#"INSERT INTO credentials
               (identity, secret_digest, display_name, service_scope, permissions, is_active, origin,
                created_at, usage_count, expires_at)
           VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, 0, ?8)"#,
    )
    .bind(identity.as_str())
    .bind(digest)
    .bind(display_name)
    .bind(service_scope)
    .bind(permissions_json)
    .bind(origin.as_str())
    .bind(created_at.to_rfc3339())
    .bind(expires_at.map(|t| t.to_rfc3339()))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_audit(
    tx: &mut Transaction<'_, Sqlite>,
    identity: &CredentialIdentity,
    action: AuditAction,
    detail: serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO audit_log (id, identity, action, detail, at) VALUES (?1, ?2, ?3, ?4, ?5)"#,
    )
    .bind(ulid::Ulid::new().to_string())
    .bind(identity.as_str())
    .bind(action.as_str())
    .bind(detail.to_string())
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| GatewayError::Internal {
            message: format!("invalid timestamp in store: {e}"),
        })
}

fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

// ─────────────────────────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
struct CredentialRow {
    identity: String,
    secret_digest: String,
    display_name: String,
    service_scope: String,
    permissions: String,
    is_active: bool,
    origin: String,
    created_at: String,
    last_used_at: Option<String>,
    usage_count: i64,
    expires_at: Option<String>,
    deactivated_at: Option<String>,
    deactivation_reason: Option<String>,
    last_used_ip: Option<String>,
}

impl CredentialRow {
    fn into_credential(self) -> Result<Credential> {
        let permissions: PermissionSet =
            serde_json::from_str(&self.permissions).map_err(kg_core::Error::from)?;
        let origin = CredentialOrigin::parse(&self.origin).ok_or_else(|| GatewayError::Internal {
            message: format!("invalid credential origin: {}", self.origin),
        })?;

        Ok(Credential {
            identity: CredentialIdentity::new(self.identity),
            display_name: self.display_name,
            service_scope: self.service_scope,
            permissions,
            is_active: self.is_active,
            origin,
            created_at: parse_ts(&self.created_at)?,
            last_used_at: parse_opt_ts(self.last_used_at)?,
            usage_count: u64::try_from(self.usage_count).unwrap_or(0),
            expires_at: parse_opt_ts(self.expires_at)?,
            deactivated_at: parse_opt_ts(self.deactivated_at)?,
            deactivation_reason: self.deactivation_reason,
            last_used_ip: self.last_used_ip,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct AuditRow {
    id: String,
    identity: String,
    action: String,
    detail: String,
    at: String,
}

impl AuditRow {
    fn into_event(self) -> Result<AuditEvent> {
        let action = AuditAction::parse(&self.action).ok_or_else(|| GatewayError::Internal {
            message: format!("invalid audit action: {}", self.action),
        })?;
        Ok(AuditEvent {
            id: self.id,
            identity: CredentialIdentity::new(self.identity),
            action,
            detail: serde_json::from_str(&self.detail).unwrap_or(serde_json::Value::Null),
            at: parse_ts(&self.at)?,
        })
    }
}
