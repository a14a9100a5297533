use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "resilience-cli")]
#[command(about = "Inspect a running resilience-core service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Sent as x-api-key so the calls count against this key's quota
    #[arg(short, long)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the readiness probes
    Health,
    /// List circuit breaker state
    Breakers,
    /// Force a circuit breaker closed
    Reset { resource: String },
    /// Drop every cached value of a resource
    Clear { resource: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert("x-api-key", HeaderValue::from_str(key)?);
    }

    let res = match cli.command {
        Commands::Health => {
            client
                .get(format!("{}/health/ready", cli.url))
                .send()
                .await?
        }
        Commands::Breakers => {
            client
                .get(format!("{}/v1/breakers", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Reset { resource } => {
            client
                .post(format!("{}/v1/breakers/{}/reset", cli.url, resource))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Clear { resource } => {
            client
                .delete(format!("{}/v1/cache/{}", cli.url, resource))
                .headers(headers)
                .send()
                .await?
        }
    };
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if let Some(retry_after) = res.headers().get("retry-after") {
        eprintln!("Rate limited, retry after {}s", retry_after.to_str().unwrap_or("?"));
    }

    let json: Value = res.json().await?;
    if !status.is_success() {
        eprintln!("Service returned status {}", status);
    }
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
