use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "payroll-cli")]
#[command(about = "Operator CLI for the x402 payroll settlement service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "PAYROLL_ADMIN_API_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check service status
    Status,
    /// Service and RPC health
    Health,
    /// List active payees
    Payees,
    /// Register a payee (salary in base units)
    AddPayee { address: String, salary: String },
    /// Change a payee's salary (base units)
    UpdateSalary { address: String, salary: String },
    /// Deactivate a payee
    Deactivate { address: String },
    /// Create payment requests for every due payee
    RunPayroll,
    /// Ask the ledger whether payroll should run at this revenue
    ShouldTrigger { revenue: String },
    /// Move asset into the treasury (base units)
    Fund { amount: String },
    /// Set the revenue threshold (base units)
    Threshold { threshold: String },
    /// Show the payment challenge or receipt for a request
    Payment { request_id: u64 },
    /// List tracked transactions
    Transactions,
    /// Resubmit failed transactions
    Retry,
    /// Show received facilitator webhooks
    Webhooks,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let url = |path: &str| format!("{}{}", cli.url.trim_end_matches('/'), path);

    let request = match cli.command {
        Commands::Status => client.get(url("/admin/status")),
        Commands::Health => client.get(url("/health")),
        Commands::Payees => client.get(url("/admin/payees")),
        Commands::AddPayee { address, salary } => client
            .post(url("/admin/payees"))
            .json(&json!({ "payee": address, "salary": salary })),
        Commands::UpdateSalary { address, salary } => client
            .post(url(&format!("/admin/payees/{}/salary", address)))
            .json(&json!({ "salary": salary })),
        Commands::Deactivate { address } => {
            client.post(url(&format!("/admin/payees/{}/deactivate", address)))
        }
        Commands::RunPayroll => client.post(url("/admin/payroll")),
        Commands::ShouldTrigger { revenue } => client
            .get(url("/admin/payroll/should-trigger"))
            .query(&[("revenue", revenue)]),
        Commands::Fund { amount } => client
            .post(url("/admin/treasury/fund"))
            .json(&json!({ "amount": amount })),
        Commands::Threshold { threshold } => client
            .post(url("/admin/threshold"))
            .json(&json!({ "threshold": threshold })),
        Commands::Payment { request_id } => client.get(url(&format!("/api/payments/{}", request_id))),
        Commands::Transactions => client.get(url("/api/transactions")),
        Commands::Retry => client.post(url("/admin/transactions/retry")),
        Commands::Webhooks => client.get(url("/api/webhooks/x402")),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    // 402 carries the payment challenge, which is what the operator asked for.
    if !status.is_success() && status != reqwest::StatusCode::PAYMENT_REQUIRED {
        eprintln!("Error: service returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
