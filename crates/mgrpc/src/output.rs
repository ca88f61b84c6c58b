use std::io::IsTerminal;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mgrpc_frame::Response;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ResponseOutput<'a> {
    method: &'a str,
    id: i64,
    status: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_msg: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resp: Option<&'a serde_json::Value>,
    elapsed_ms: u128,
    timestamp: String,
}

pub fn print_response(response: &Response, method: &str, elapsed: Duration, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ResponseOutput {
                method,
                id: response.id,
                status: response.status,
                status_msg: response.status_msg.as_deref(),
                resp: response.resp.as_ref(),
                elapsed_ms: elapsed.as_millis(),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METHOD", "ID", "STATUS", "MESSAGE", "ELAPSED", "RESPONSE"])
                .add_row(vec![
                    method.to_string(),
                    response.id.to_string(),
                    response.status.to_string(),
                    response.status_msg.clone().unwrap_or_default(),
                    format!("{}ms", elapsed.as_millis()),
                    body_compact(response.resp.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if response.is_ok() {
                eprintln!("{method}: ok in {}ms", elapsed.as_millis());
            } else {
                eprintln!(
                    "{method}: status {} ({}) in {}ms",
                    response.status,
                    response.status_msg.as_deref().unwrap_or("no message"),
                    elapsed.as_millis()
                );
            }
            if let Some(body) = &response.resp {
                println!(
                    "{}",
                    serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string())
                );
            }
        }
    }
}

fn body_compact(body: Option<&serde_json::Value>) -> String {
    match body {
        Some(value) => value.to_string(),
        None => String::new(),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_output_omits_absent_fields() {
        let response = Response::ok(7, None);
        let out = ResponseOutput {
            method: "Sys.Ping",
            id: response.id,
            status: response.status,
            status_msg: response.status_msg.as_deref(),
            resp: response.resp.as_ref(),
            elapsed_ms: 3,
            timestamp: "0".to_string(),
        };
        let text = serde_json::to_string(&out).unwrap();
        assert!(text.contains("\"method\":\"Sys.Ping\""));
        assert!(!text.contains("status_msg"));
        assert!(!text.contains("\"resp\""));
    }

    #[test]
    fn compact_body() {
        assert_eq!(body_compact(Some(&json!({"a": 1}))), "{\"a\":1}");
        assert_eq!(body_compact(None), "");
    }
}
