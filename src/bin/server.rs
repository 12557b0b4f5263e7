//! Xfer 서버 (송신자)
//!
//! 승인된 파일과 캐시 디렉터리 파일을 요청에 따라 내보낸다.
//!
//! 사용법:
//!   cargo run --release --bin xfer-server -- [OPTIONS]
//!
//! 예시:
//!   # 파일 하나 승인 후 대기
//!   cargo run --release --bin xfer-server -- --bind 0.0.0.0:13000 --allow data.bin
//!
//!   # 혼잡 리전 설정 + 신뢰 회선
//!   cargo run --release --bin xfer-server -- --busy --trust 10.0.0.5:13000

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use xfer::{Config, LocalStorage, XferManager, XferNode};

/// 서버 설정
struct ServerConfig {
    bind_addr: SocketAddr,
    cache_dir: PathBuf,
    allowed: Vec<String>,
    trusted: Vec<SocketAddr>,
    stats_interval: Duration,
    config: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 13000)),
            cache_dir: PathBuf::from("cache"),
            allowed: Vec::new(),
            trusted: Vec::new(),
            stats_interval: Duration::from_secs(10),
            config: Config::default(),
        }
    }
}

/// 옵션 값 파싱 (실패 시 종료)
fn value<T: FromStr>(args: &[String], i: usize, name: &str) -> T {
    match args.get(i + 1).map(|v| v.parse()) {
        Some(Ok(v)) => v,
        _ => {
            eprintln!("{} 에 유효한 값 필요", name);
            std::process::exit(2);
        }
    }
}

fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--bind" | "-b" => {
                config.bind_addr = value(&args, i, arg);
                i += 1;
            }
            "--cache-dir" | "-c" => {
                config.cache_dir = value(&args, i, arg);
                i += 1;
            }
            "--allow" | "-a" => {
                config.allowed.push(value(&args, i, arg));
                i += 1;
            }
            "--trust" | "-t" => {
                config.trusted.push(value(&args, i, arg));
                i += 1;
            }
            "--max-outgoing" => {
                config.config.max_outgoing_xfers_per_circuit = value(&args, i, arg);
                i += 1;
            }
            "--hard-limit" => {
                config.config.hard_limit_outgoing_xfers_per_circuit = value(&args, i, arg);
                i += 1;
            }
            "--timeout-ms" => {
                config.config.packet_timeout_ms = value(&args, i, arg);
                i += 1;
            }
            "--stats-secs" => {
                config.stats_interval = Duration::from_secs(value(&args, i, arg));
                i += 1;
            }
            "--busy" => {
                config.config = Config::busy_region();
            }
            "--help" | "-h" => {
                println!(
                    r#"Xfer Server - stop-and-wait 대용량 전송 서버

사용법:
  cargo run --release --bin xfer-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>         바인드 주소 (기본: 0.0.0.0:13000)
  -c, --cache-dir <PATH>    캐시 디렉터리 (기본: cache)
  -a, --allow <FILE>        원격 요청 1회 승인 (반복 가능)
  -t, --trust <ADDR>        하드 리밋 위반 시에도 끊지 않을 호스트
  --max-outgoing <N>        회선당 동시 송신 수 (기본: 10)
  --hard-limit <N>          회선당 송신 하드 리밋, 0 = 없음 (기본: 500)
  --timeout-ms <MS>         패킷 확인 타임아웃 (기본: 3000)
  --stats-secs <SECS>       통계 출력 간격 (기본: 10)
  --busy                    혼잡 리전 설정 사용
  -h, --help                이 도움말 출력

로그 레벨은 RUST_LOG 로 조정 (기본: info)
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let server_config = parse_args();

    info!("Xfer Server starting...");
    info!("Bind address: {}", server_config.bind_addr);
    info!("Cache dir: {}", server_config.cache_dir.display());
    info!(
        "Outgoing per circuit: {} (hard limit {})",
        server_config.config.max_outgoing_xfers_per_circuit,
        server_config.config.hard_limit_outgoing_xfers_per_circuit
    );

    let mut manager = XferManager::new(
        server_config.config.clone(),
        LocalStorage::new(&server_config.cache_dir),
    );
    for name in &server_config.allowed {
        info!("Allowing: {}", name);
        manager.expect_file_for_transfer(name);
    }
    for host in &server_config.trusted {
        manager.set_trusted_host(*host, true);
    }

    let node = Arc::new(XferNode::bind(server_config.bind_addr, manager).await?);

    let run_node = node.clone();
    let run = tokio::spawn(async move { run_node.run().await });

    // 통계 출력 태스크
    let stats_node = node.clone();
    let stats_interval = server_config.stats_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(stats_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let manager = stats_node.manager();
            let manager = manager.lock();
            info!("{}", manager.stats().summary());
            manager.print_host_status();
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    node.stop();
    run.await??;

    Ok(())
}
