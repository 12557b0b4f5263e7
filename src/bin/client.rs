//! Xfer 클라이언트 (수신자)
//!
//! 서버에 파일을 요청하고 완료될 때까지 기다린다.
//!
//! 사용법:
//!   cargo run --release --bin xfer-client -- [OPTIONS]
//!
//! 예시:
//!   # 승인된 파일 수신
//!   cargo run --release --bin xfer-client -- --server 127.0.0.1:13000 --remote data.bin -o received.bin
//!
//!   # 캐시 디렉터리 파일을 big packet 으로 수신
//!   cargo run --release --bin xfer-client -- -r scene.raw --cache --big -o scene.raw

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use xfer::{completion_channel, Config, LocalStorage, PathRoot, XferManager, XferNode};

/// 클라이언트 설정
struct ClientConfig {
    bind_addr: SocketAddr,
    server_addr: SocketAddr,
    remote: Option<String>,
    output_path: Option<PathBuf>,
    root: PathRoot,
    delete_remote: bool,
    use_big_packets: bool,
    timeout: Duration,
    config: Config,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            server_addr: SocketAddr::from(([127, 0, 0, 1], 13000)),
            remote: None,
            output_path: None,
            root: PathRoot::None,
            delete_remote: false,
            use_big_packets: false,
            timeout: Duration::from_secs(600),
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

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--bind" | "-b" => {
                config.bind_addr = value(&args, i, arg);
                i += 1;
            }
            "--server" | "-s" => {
                config.server_addr = value(&args, i, arg);
                i += 1;
            }
            "--remote" | "-r" => {
                config.remote = Some(value(&args, i, arg));
                i += 1;
            }
            "--output" | "-o" => {
                config.output_path = Some(value(&args, i, arg));
                i += 1;
            }
            "--timeout-secs" => {
                config.timeout = Duration::from_secs(value(&args, i, arg));
                i += 1;
            }
            "--cache" => config.root = PathRoot::Cache,
            "--delete-remote" => config.delete_remote = true,
            "--big" => config.use_big_packets = true,
            "--throttle" => {
                config.config.use_ack_throttling = true;
                config.config.ack_throttle_bps = value(&args, i, arg);
                i += 1;
            }
            "--help" | "-h" => {
                println!(
                    r#"Xfer Client - stop-and-wait 대용량 전송 클라이언트

사용법:
  cargo run --release --bin xfer-client -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       로컬 바인드 주소 (기본: 0.0.0.0:0 = 자동 할당)
  -s, --server <ADDR>     서버 주소 (기본: 127.0.0.1:13000)
  -r, --remote <NAME>     요청할 원격 파일명
  -o, --output <PATH>     저장 경로 (기본: 원격 파일명)
  --cache                 원격 캐시 디렉터리 기준 파일명
  --delete-remote         완료 후 원격 파일 삭제
  --big                   big packet 사용
  --throttle <BPS>        확인 패킷 스로틀 (bits/sec)
  --timeout-secs <SECS>   전체 대기 시간 (기본: 600)
  -h, --help              이 도움말 출력

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

    let client_config = parse_args();
    let Some(remote) = client_config.remote.clone() else {
        eprintln!("--remote 필요 (--help 참고)");
        std::process::exit(2);
    };
    let output = client_config
        .output_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(&remote));

    info!("Xfer Client starting...");
    info!("Server address: {}", client_config.server_addr);
    info!("Requesting: {} -> {}", remote, output.display());

    let manager = XferManager::new(client_config.config.clone(), LocalStorage::new("cache"));
    let node = Arc::new(XferNode::bind(client_config.bind_addr, manager).await?);

    let run_node = node.clone();
    let run = tokio::spawn(async move { run_node.run().await });

    let (callback, done) = completion_channel();
    let start = Instant::now();
    node.manager().lock().request_file(
        &output,
        &remote,
        client_config.root,
        client_config.server_addr,
        client_config.delete_remote,
        Some(callback),
        false,
        client_config.use_big_packets,
    )?;

    let timeout = client_config.timeout;
    let outcome = tokio::task::spawn_blocking(move || done.recv_timeout(timeout)).await?;

    node.stop();
    run.await??;

    let stats = node.manager().lock().stats().clone();
    match outcome {
        Ok(outcome) if outcome.result.is_ok() => {
            let elapsed = start.elapsed();
            info!("Transfer complete!");
            info!("  Time: {:.2}s", elapsed.as_secs_f64());
            info!("  Received: {} bytes", stats.bytes_received);
            info!(
                "  Throughput: {:.2} KB/s",
                stats.bytes_received as f64 / elapsed.as_secs_f64().max(0.001) / 1000.0
            );
            info!("{}", stats.summary());
            Ok(())
        }
        Ok(outcome) => {
            warn!(
                "Transfer failed: {} ({:?})",
                outcome.result, outcome.ext_status
            );
            std::process::exit(1);
        }
        Err(_) => {
            warn!("Transfer timed out after {:?}", timeout);
            std::process::exit(1);
        }
    }
}
