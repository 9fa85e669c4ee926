//! Standalone data collector CLI.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use dx_collector::{register_jobs, Scheduler, Services};
use dx_core::{init_logging, AppConfig, IngestParams, LogConfig, Market};
use std::time::Duration;

/// 데몬 종료 시 실행 중인 작업을 기다리는 최대 시간.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "dx-collector")]
#[command(about = "DX Unified Standalone Data Collector", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// 뉴스 수집 1회 실행
    News,

    /// 테마/종목 크롤링
    Crawl {
        /// 일별 종목 스냅샷도 저장
        #[arg(long)]
        history: bool,
    },

    /// 캔들 수집
    Candles {
        /// 시장 (KR, US)
        #[arg(long, default_value = "KR")]
        market: Market,

        /// 타임프레임 (1m, 5m, 1d)
        #[arg(long, default_value = "1m")]
        timeframe: String,

        /// 유니버스 일자 (YYYY-MM-DD, 기본: 시장 기준 오늘)
        #[arg(long)]
        date: Option<String>,
    },

    /// 유니버스 생성
    Universe {
        #[arg(long, default_value = "US")]
        market: Market,

        /// 최소 시가총액
        #[arg(long, default_value_t = 0.0)]
        min_mcap: f64,
    },

    /// DART 기업 고유번호 갱신
    DartCorps,

    /// DART 최근 공시 수집
    DartFilings,

    /// DART 공시 원문 다운로드
    DartDocs,

    /// 데몬 모드: 스케줄러로 모든 작업 실행
    Daemon,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env(&format!("dx_collector={0},dx_data={0},dx_core={0}", cli.log_level));
    init_logging(&log_config).map_err(|e| anyhow::anyhow!("logging init failed: {}", e))?;

    tracing::info!("DX Data Collector 시작");

    let config = AppConfig::load().context("설정 로드 실패")?;
    tracing::debug!(?config, "설정 로드 완료");

    let services = Services::open(&config).await;

    match cli.command {
        Commands::News => {
            let Some(news) = &services.news else {
                bail!("뉴스 제공자가 설정되지 않았습니다 (NAVER_CLIENT_ID/NEWSAPI_KEY)");
            };
            let run = news.run().await?;
            tracing::info!(
                run_id = %run.run_id,
                status = run.status.as_str(),
                stored = run.stats.total_stored,
                duplicates = run.stats.total_dups,
                "뉴스 수집 완료"
            );
        }
        Commands::Crawl { history } => {
            let Some(crawl) = &services.crawl else {
                bail!("테마 저장소를 열 수 없습니다");
            };
            let result = crawl.run(history).await?;
            tracing::info!(
                themes = result.themes_crawled,
                stocks = result.stocks_crawled,
                history = result.history_saved,
                errors = result.errors.len(),
                "크롤링 완료"
            );
        }
        Commands::Candles {
            market,
            timeframe,
            date,
        } => {
            let run = services
                .collect_candles(IngestParams {
                    market,
                    timeframe,
                    ymd: date,
                })
                .await?;
            tracing::info!(
                id = run.id,
                status = %run.status,
                symbols = run.symbols_count,
                rows = run.inserted_rows,
                "캔들 수집 완료"
            );
        }
        Commands::Universe { market, min_mcap } => {
            let Some(universe) = &services.universe else {
                bail!("캔들 저장소를 열 수 없습니다");
            };
            let ymd = dx_collector::modules::market_today(market);
            let snapshot = universe.build(market, min_mcap, &ymd).await?;
            tracing::info!(%ymd, symbols = snapshot.symbols.len(), "유니버스 생성 완료");
        }
        Commands::DartCorps => {
            dart_jobs(&services)?.update_corp_codes().await?;
        }
        Commands::DartFilings => {
            dart_jobs(&services)?.fetch_filings().await?;
        }
        Commands::DartDocs => {
            dart_jobs(&services)?.download_documents().await?;
        }
        Commands::Daemon => {
            let mut scheduler = Scheduler::new(config.schedule.tz()?);
            let registered = register_jobs(&mut scheduler, &services, &config)?;
            if registered == 0 {
                bail!("등록된 작업이 없습니다");
            }

            tracing::info!("=== 데몬 모드 시작 (작업 {}개) ===", registered);
            services.initial_setup().await;
            scheduler.start().await?;

            tokio::signal::ctrl_c().await?;
            tracing::info!("종료 신호 수신, 데몬 종료 중...");

            if !scheduler.stop(SHUTDOWN_TIMEOUT).await? {
                tracing::warn!("실행 중인 작업을 기다리지 못하고 종료합니다");
            }
        }
    }

    tracing::info!("DX Data Collector 종료");
    Ok(())
}

fn dart_jobs(services: &Services) -> anyhow::Result<&dx_collector::modules::DartJobs> {
    services
        .dart
        .as_deref()
        .context("DART_API_KEY가 설정되지 않았습니다")
}
