//! Exchange an API key and secret for an application-only bearer token.

use std::process::ExitCode;
use std::time::Duration;

use clap::{CommandFactory, Parser};

use tweetsink::token::{obtain_bearer_token, TOKEN_ENDPOINT};

#[derive(Parser, Debug)]
#[command(name = "bearer-token")]
#[command(about = "Obtain a Twitter bearer token")]
#[command(version)]
struct Args {
    /// Twitter API Key
    #[arg(long, alias = "apiKey")]
    api_key: Option<String>,

    /// Twitter API Secret
    #[arg(long, alias = "apiSecret")]
    api_secret: Option<String>,

    /// Token endpoint
    #[arg(long, default_value = TOKEN_ENDPOINT)]
    endpoint: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let (Some(api_key), Some(api_secret)) = (
        args.api_key.filter(|k| !k.is_empty()),
        args.api_secret.filter(|s| !s.is_empty()),
    ) else {
        let _ = Args::command().print_help();
        return ExitCode::from(2);
    };

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to build HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };

    match obtain_bearer_token(&client, &args.endpoint, &api_key, &api_secret).await {
        Ok(token) => {
            println!("Token: {}", token.as_str());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("\n{e}");
            ExitCode::FAILURE
        }
    }
}
