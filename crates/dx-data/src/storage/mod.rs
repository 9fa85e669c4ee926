//! 도메인별 SQLite 저장소.
//!
//! 각 도메인(DART, 테마/종목, 캔들, 뉴스)은 독립된 데이터베이스 파일을 가지며,
//! 하나가 열리지 않아도 나머지 도메인은 계속 동작합니다.

pub mod candle;
pub mod dart;
pub mod judal;
pub mod news;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{DataError, Result};

/// SQLite 연결 풀 래퍼.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// 파일 데이터베이스를 엽니다. 상위 디렉토리가 없으면 만듭니다.
    pub async fn open(path: &str) -> Result<Self> {
        if let Some(dir) = Path::new(path).parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
            .map_err(|e| DataError::ConnectionError(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| DataError::ConnectionError(format!("{}: {}", path, e)))?;

        info!(path = %path, "SQLite database opened");
        Ok(Self { pool })
    }

    /// 테스트용 인메모리 데이터베이스.
    ///
    /// 연결이 끊기면 데이터가 사라지므로 단일 연결을 유지합니다.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 스키마 문장들을 순서대로 적용합니다 (모두 `IF NOT EXISTS`).
    pub async fn apply_schema(&self, statements: &[&str]) -> Result<()> {
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// 연결 상태 확인.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
