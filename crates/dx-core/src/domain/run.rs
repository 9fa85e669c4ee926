//! 파이프라인 실행 로그.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 실행 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// 시작됨, 아직 종료 전
    Running,
    Success,
    /// 일부 소스/배치 실패
    PartialFailure,
    /// 실행 자체가 불가능했음
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// 오류 유무로 종료 상태를 결정합니다.
    pub fn from_errors(errors: &[String]) -> Self {
        if errors.is_empty() {
            Self::Success
        } else {
            Self::PartialFailure
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "partial_failure" | "partial" => Ok(Self::PartialFailure),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

/// 소스별 집계.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub fetched: u64,
    pub stored: u64,
    pub duplicates: u64,
}

/// 실행 전체 집계.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_fetched: u64,
    pub total_stored: u64,
    pub total_dups: u64,
    pub sources: BTreeMap<String, SourceStats>,
}

impl RunStats {
    /// 소스 집계를 추가하고 합계를 다시 계산합니다.
    pub fn record_source(&mut self, source: &str, stats: SourceStats) {
        self.sources.insert(source.to_string(), stats);
        self.total_fetched = self.sources.values().map(|s| s.fetched).sum();
        self.total_stored = self.sources.values().map(|s| s.stored).sum();
        self.total_dups = self.sources.values().map(|s| s.duplicates).sum();
    }
}

/// 한 번의 수집 실행 기록.
///
/// 시작 시 생성되고 종료 시 정확히 한 번 확정됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub stats: RunStats,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl RunLog {
    /// 새 실행 로그 (상태: running).
    pub fn start(run_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            ended_at: None,
            status: RunStatus::Running,
            stats: RunStats::default(),
            errors: Vec::new(),
        }
    }

    /// 종료 시각과 상태를 확정합니다.
    pub fn finalize(&mut self, ended_at: DateTime<Utc>) {
        self.ended_at = Some(ended_at);
        self.status = RunStatus::from_errors(&self.errors);
    }

    pub fn is_finalized(&self) -> bool {
        self.ended_at.is_some() && self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_source_recomputes_totals() {
        let mut stats = RunStats::default();
        stats.record_source("a", SourceStats { fetched: 3, stored: 3, duplicates: 1 });
        stats.record_source("b", SourceStats { fetched: 2, stored: 1, duplicates: 0 });
        stats.record_source("a", SourceStats { fetched: 4, stored: 4, duplicates: 2 });

        assert_eq!(stats.total_fetched, 6);
        assert_eq!(stats.total_stored, 5);
        assert_eq!(stats.total_dups, 2);
    }

    #[test]
    fn test_finalize_sets_terminal_status() {
        let mut log = RunLog::start("r1", Utc::now());
        assert!(!log.is_finalized());

        log.errors.push("naver: timeout".to_string());
        log.finalize(Utc::now());

        assert!(log.is_finalized());
        assert_eq!(log.status, RunStatus::PartialFailure);
    }

    #[test]
    fn test_status_serde_round_names() {
        let json = serde_json::to_string(&RunStatus::PartialFailure).unwrap();
        assert_eq!(json, "\"partial_failure\"");
        assert_eq!("partial".parse::<RunStatus>().unwrap(), RunStatus::PartialFailure);
    }
}
