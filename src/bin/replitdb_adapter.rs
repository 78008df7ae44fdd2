//! Command adapter for the Rust client.
//!
//! Communicates with a driver process via stdin/stdout using a JSON-line
//! protocol: one command object per input line, one result object per
//! output line.

use replit_db::{Client, DbError, MemoryTransport, ENV_DB_URL};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use tokio::runtime::Runtime;

const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

// Command types from the driver
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Command {
    #[serde(rename = "type")]
    cmd_type: String,
    // Init fields
    url: Option<String>,
    memory: Option<bool>,
    // Key fields
    key: Option<String>,
    value: Option<String>,
    keys: Option<Vec<String>>,
    // Listing fields
    prefix: Option<String>,
    limit: Option<usize>,
}

// Result types sent back to the driver
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Result {
    #[serde(rename = "type")]
    result_type: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keys: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn main() -> io::Result<()> {
    let rt = Runtime::new()?;
    let mut client: Option<Client> = None;

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }

        let result = match serde_json::from_str::<Command>(&line) {
            Ok(cmd) => rt.block_on(handle_command(&mut client, cmd)),
            Err(e) => error_result(
                "unknown",
                "PARSE_ERROR",
                &format!("failed to parse command: {}", e),
            ),
        };

        let output = serde_json::to_string(&result).map_err(io::Error::other)?;
        writeln!(stdout, "{}", output)?;
        stdout.flush()?;

        if result.result_type == "shutdown" {
            break;
        }
    }

    Ok(())
}

async fn handle_command(client: &mut Option<Client>, cmd: Command) -> Result {
    if cmd.cmd_type == "init" {
        return handle_init(client, cmd);
    }
    if cmd.cmd_type == "shutdown" {
        return Result {
            result_type: "shutdown".to_string(),
            success: true,
            ..Default::default()
        };
    }

    let Some(client) = client.as_ref() else {
        return error_result(&cmd.cmd_type, "NOT_INITIALIZED", "send an init command first");
    };

    let outcome = match cmd.cmd_type.as_str() {
        "set" => handle_set(client, &cmd).await,
        "get" => handle_get(client, &cmd).await,
        "delete" => handle_delete(client, &cmd).await,
        "list" => handle_list(client, &cmd).await,
        "values" => handle_values(client, &cmd).await,
        "delete-multiple" => handle_delete_multiple(client, &cmd).await,
        "empty" => client.empty().await.map(|_| Result::default()),
        _ => {
            return error_result(
                &cmd.cmd_type,
                "NOT_SUPPORTED",
                &format!("unknown command type: {}", cmd.cmd_type),
            )
        }
    };

    match outcome {
        Ok(mut result) => {
            result.result_type = cmd.cmd_type;
            result.success = true;
            result
        }
        Err(err) => db_error_result(&cmd.cmd_type, err),
    }
}

fn handle_init(client: &mut Option<Client>, cmd: Command) -> Result {
    let built = if cmd.memory.unwrap_or(false) {
        Ok(MemoryTransport::new().client())
    } else {
        match cmd.url {
            Some(url) => Client::builder().base_url(url).build(),
            None => Client::from_env(),
        }
    };

    match built {
        Ok(c) => {
            *client = Some(c);
            Result {
                result_type: "init".to_string(),
                success: true,
                client_name: Some("replit-db-rust".to_string()),
                client_version: Some(CLIENT_VERSION.to_string()),
                ..Default::default()
            }
        }
        Err(DbError::MissingBaseUrl) => error_result(
            "init",
            "MISSING_BASE_URL",
            &format!("no url given and {} is not set", ENV_DB_URL),
        ),
        Err(err) => db_error_result("init", err),
    }
}

async fn handle_set(client: &Client, cmd: &Command) -> std::result::Result<Result, DbError> {
    let key = cmd.key.as_deref().unwrap_or_default();
    let value = cmd.value.as_deref().unwrap_or_default();
    client.set(key, value).await?;
    Ok(Result::default())
}

async fn handle_get(client: &Client, cmd: &Command) -> std::result::Result<Result, DbError> {
    let value = client.get(cmd.key.as_deref().unwrap_or_default()).await?;
    Ok(Result {
        value: Some(value),
        ..Default::default()
    })
}

async fn handle_delete(client: &Client, cmd: &Command) -> std::result::Result<Result, DbError> {
    client.delete(cmd.key.as_deref().unwrap_or_default()).await?;
    Ok(Result::default())
}

async fn handle_list(client: &Client, cmd: &Command) -> std::result::Result<Result, DbError> {
    let limit = cmd.limit.unwrap_or(usize::MAX);
    let mut stream = client.list_keys(cmd.prefix.clone().unwrap_or_default());
    let mut keys = Vec::new();

    while keys.len() < limit {
        match stream.next_key().await? {
            Some(key) => keys.push(key),
            None => break,
        }
    }
    stream.close();

    Ok(Result {
        keys: Some(keys),
        ..Default::default()
    })
}

async fn handle_values(client: &Client, cmd: &Command) -> std::result::Result<Result, DbError> {
    let limit = cmd.limit.unwrap_or(usize::MAX);
    let mut stream = client.get_all_values();
    let mut values = Vec::new();

    while values.len() < limit {
        match stream.next_value().await? {
            Some(value) => values.push(value),
            None => break,
        }
    }
    stream.close();

    Ok(Result {
        values: Some(values),
        ..Default::default()
    })
}

async fn handle_delete_multiple(
    client: &Client,
    cmd: &Command,
) -> std::result::Result<Result, DbError> {
    let keys = cmd.keys.as_deref().unwrap_or_default();
    client.delete_multiple(keys).await?;
    Ok(Result::default())
}

fn error_result(cmd_type: &str, code: &str, message: &str) -> Result {
    Result {
        result_type: "error".to_string(),
        success: false,
        command_type: Some(cmd_type.to_string()),
        error_code: Some(code.to_string()),
        message: Some(message.to_string()),
        ..Default::default()
    }
}

fn db_error_result(cmd_type: &str, err: DbError) -> Result {
    Result {
        result_type: "error".to_string(),
        success: false,
        command_type: Some(cmd_type.to_string()),
        status: err.status_code(),
        error_code: Some(err.to_error_code().to_string()),
        message: Some(err.to_string()),
        ..Default::default()
    }
}
