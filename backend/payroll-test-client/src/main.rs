// src/main.rs

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::error::Error;

// Request types
#[derive(Debug, Serialize)]
struct ClockRecord {
    id: String,
    date: String,
    emp: String,
    min_raw: i64,
    min: i64,
    yen_h: i64,
    yen: i64,
    flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct ClearRequest {
    op: &'static str,
}

// Response types
#[derive(Debug, Deserialize)]
struct HealthResponse {
    ok: bool,
}

#[derive(Debug, Deserialize)]
struct UpsertResponse {
    ok: bool,
    inserted: usize,
    updated: usize,
    skipped: usize,
    refreshed: bool,
    refresh_error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClearResponse {
    ok: bool,
    cleared_rows: usize,
    refreshed: bool,
    refresh_error: Option<String>,
}

fn record(id: &str, date: &str, emp: &str, min: i64, flags: &[&str], name: Option<&str>) -> ClockRecord {
    ClockRecord {
        id: id.to_string(),
        date: date.to_string(),
        emp: emp.to_string(),
        min_raw: min,
        min,
        yen_h: 1200,
        yen: min * 20,
        flags: flags.iter().map(|f| f.to_string()).collect(),
        name: name.map(str::to_string),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let base_url = std::env::var("PAYROLL_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let client = Client::new();
    let today = prompt_for_date()?;

    // Test 1: Health check
    println!("\n🔍 Testing health check endpoint...");
    let health_response = client
        .get(&base_url)
        .send()
        .await?
        .json::<HealthResponse>()
        .await?;

    println!("Health check response: {:?}", health_response);

    // Test 2: Insert records
    println!("\n🔍 Posting two new records...");
    let records = vec![
        record("client-r1", &today, "emp01", 60, &["late"], Some("Alice")),
        record("client-r2", &today, "emp02", 30, &[], None),
    ];
    let insert_response = client
        .post(&base_url)
        .json(&records)
        .send()
        .await?
        .json::<UpsertResponse>()
        .await?;

    println!("Insert response: {:?}", insert_response);

    // Test 3: Update one record, skip one without an id
    println!("\n🔍 Updating a record and sending one without an id...");
    let body = serde_json::json!({
        "records": [
            record("client-r1", &today, "emp01", 75, &["late", "overtime"], None),
            { "emp": "emp03", "min": 10 }
        ]
    });
    let update_response = client
        .post(&base_url)
        .json(&body)
        .send()
        .await?
        .json::<UpsertResponse>()
        .await?;

    println!("Update response: {:?}", update_response);
    if update_response.updated != 1 || update_response.skipped != 1 {
        println!("⚠️ Expected 1 updated and 1 skipped");
    }

    // Test 4: Malformed body
    println!("\n🔍 Sending a malformed body...");
    let bad_response = client
        .post(&base_url)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;

    println!("Malformed body status: {}", bad_response.status());
    println!("Malformed body response: {}", bad_response.text().await?);

    // Test 5: Clear the ledger
    println!("\n🔍 Clearing the ledger...");
    let clear_response = client
        .post(&base_url)
        .json(&ClearRequest { op: "clear" })
        .send()
        .await?
        .json::<ClearResponse>()
        .await?;

    println!("Clear response: {:?}", clear_response);

    println!("\n✅ Testing complete!");

    Ok(())
}

fn prompt_for_date() -> Result<String, Box<dyn Error>> {
    println!("Enter the record date as yyyy-MM-dd (use a day of the current month):");
    let mut date = String::new();
    std::io::stdin().read_line(&mut date)?;
    Ok(date.trim().to_string())
}
