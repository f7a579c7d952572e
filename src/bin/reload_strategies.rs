//! Small CLI hitting the running engine's `/reload-strategies` control
//! endpoint, for operators pushing a new or edited strategy without a
//! restart.

use clap::Parser;

#[derive(Parser)]
struct Args {
    /// Base URL of the process endpoints server (the `OBSERVABILITY_*` host:port).
    #[arg(long, default_value = "http://127.0.0.1:9090")]
    base_url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let url = format!("{}/reload-strategies", args.base_url.trim_end_matches('/'));

    let client = reqwest::Client::new();
    let response = client.post(&url).send().await?;

    if response.status().is_success() {
        println!("strategies reloaded");
        Ok(())
    } else {
        anyhow::bail!("reload request failed: {}", response.status());
    }
}
