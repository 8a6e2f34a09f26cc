use anyhow::Context;
use clap::Subcommand;
use serde_json::Value;

use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum TenantCommands {
    #[command(about = "List active tenants with storage state")]
    List,

    #[command(about = "Show one tenant")]
    Show {
        #[arg(help = "Tenant ID")]
        tenant: String,
    },

    #[command(about = "Provision a tenant's storage namespace")]
    Provision {
        #[arg(help = "Tenant ID")]
        tenant: String,

        #[arg(long, help = "Apply the full change set instead of the minimal onboarding set")]
        complete: bool,
    },

    #[command(about = "Check a tenant's tables against the expected set")]
    Verify {
        #[arg(help = "Tenant ID")]
        tenant: String,
    },

    #[command(about = "Run one reconciliation pass over all active tenants")]
    Reconcile,
}

pub async fn handle(
    cmd: TenantCommands,
    output_format: OutputFormat,
    base_url: &str,
) -> anyhow::Result<()> {
    let client = reqwest::Client::new();

    match cmd {
        TenantCommands::List => {
            let body = get_json(&client, &format!("{}/api/root/tenant", base_url)).await?;
            match output_format {
                OutputFormat::Json => print_json(&body)?,
                OutputFormat::Text => {
                    let empty = Vec::new();
                    let tenants = body["data"].as_array().unwrap_or(&empty);
                    if tenants.is_empty() {
                        println!("No active tenants");
                        return Ok(());
                    }
                    println!(
                        "{:<38} {:<25} {:<25} {:<12} {}",
                        "ID", "NAME", "NAMESPACE", "STATUS", "LAST ERROR"
                    );
                    println!("{}", "-".repeat(110));
                    for t in tenants {
                        println!(
                            "{:<38} {:<25} {:<25} {:<12} {}",
                            t["id"].as_str().unwrap_or("-"),
                            t["name"].as_str().unwrap_or("-"),
                            t["namespace"].as_str().unwrap_or("-"),
                            t["storage_status"].as_str().unwrap_or("-"),
                            t["last_error"].as_str().unwrap_or("")
                        );
                    }
                }
            }
            Ok(())
        }
        TenantCommands::Show { tenant } => {
            let body = get_json(&client, &format!("{}/api/root/tenant/{}", base_url, tenant)).await?;
            print_json(&body)
        }
        TenantCommands::Provision { tenant, complete } => {
            let mode = if complete { "complete" } else { "minimal" };
            let url = format!(
                "{}/api/root/tenant/{}/provision?mode={}",
                base_url, tenant, mode
            );
            let body = post_json(&client, &url).await?;
            match output_format {
                OutputFormat::Json => print_json(&body),
                OutputFormat::Text => {
                    println!(
                        "tenant {} -> {}",
                        tenant,
                        body["data"]["storage_status"].as_str().unwrap_or("?")
                    );
                    Ok(())
                }
            }
        }
        TenantCommands::Verify { tenant } => {
            let body =
                get_json(&client, &format!("{}/api/root/tenant/{}/verify", base_url, tenant)).await?;
            match output_format {
                OutputFormat::Json => print_json(&body),
                OutputFormat::Text => {
                    let verification = &body["data"]["verification"];
                    if verification["complete"].as_bool().unwrap_or(false) {
                        println!("tenant {} storage is complete", tenant);
                    } else {
                        let empty = Vec::new();
                        let missing = verification["missing"].as_array().unwrap_or(&empty);
                        println!("tenant {} storage is incomplete; missing:", tenant);
                        for table in missing {
                            println!("  - {}", table.as_str().unwrap_or("?"));
                        }
                    }
                    Ok(())
                }
            }
        }
        TenantCommands::Reconcile => {
            let body = post_json(&client, &format!("{}/api/root/reconcile", base_url)).await?;
            match output_format {
                OutputFormat::Json => print_json(&body),
                OutputFormat::Text => {
                    let report = &body["data"];
                    println!(
                        "checked={} created={} submitted={} errored={}",
                        report["checked"], report["created"], report["submitted"], report["errored"]
                    );
                    Ok(())
                }
            }
        }
    }
}

async fn get_json(client: &reqwest::Client, url: &str) -> anyhow::Result<Value> {
    let response = client.get(url).send().await.context("request failed")?;
    decode(response).await
}

async fn post_json(client: &reqwest::Client, url: &str) -> anyhow::Result<Value> {
    let response = client.post(url).send().await.context("request failed")?;
    decode(response).await
}

async fn decode(response: reqwest::Response) -> anyhow::Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.context("invalid JSON response")?;
    if !status.is_success() {
        anyhow::bail!(
            "server returned {}: {}",
            status,
            body["message"].as_str().unwrap_or("unknown error")
        );
    }
    Ok(body)
}

fn print_json(body: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(body)?);
    Ok(())
}
