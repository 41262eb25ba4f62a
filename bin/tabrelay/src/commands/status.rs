use tabrelay_core::{Config, Paths};
use tokio::net::TcpStream;

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("tabrelay status");
    println!("===============");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (not found, using defaults)" }
    );

    let config = Config::load_or_default(&paths)?;
    let transport = &config.transport;
    println!(
        "Reconnect: every {}ms, port probe delay {}ms",
        transport.reconnect_interval_ms, transport.port_probe_delay_ms
    );
    println!();

    println!("Controller ports:");
    let mut listening = 0;
    for endpoint in transport.candidates() {
        let probe = tokio::time::timeout(
            transport.connect_timeout(),
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await;
        let status = match probe {
            Ok(Ok(_)) => {
                listening += 1;
                "✓ listening"
            }
            Ok(Err(_)) => "✗ closed",
            Err(_) => "✗ timed out",
        };
        println!("  {:<22} {}", endpoint.url(), status);
    }

    println!();
    if listening == 0 {
        println!("No controller found. Start it, then run `tabrelay run`.");
    }
    Ok(())
}
