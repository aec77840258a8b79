//! Bulk summary export, newline-delimited JSON or CSV, oldest-first.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::response::{internal_error, not_found};
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    format: Option<String>,
}

fn wants_csv(accept: Option<&str>, format: Option<&str>) -> bool {
    if let Some(f) = format {
        return f.eq_ignore_ascii_case("csv");
    }
    accept.is_some_and(|a| a.contains("text/csv"))
}

/// RFC 4180 field quoting: wraps in double-quotes if the field contains a
/// comma, double-quote, or newline; embedded double-quotes are doubled.
fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_owned()
    }
}

pub async fn export_summaries(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Query(query): Query<ExportQuery>,
    headers: axum::http::HeaderMap,
) -> Response {
    let internal_id = match state.store.group_internal_id(&group_id).await {
        Ok(Some(id)) => id,
        Ok(None) => return not_found(format!("group {group_id} not found")),
        Err(e) => return internal_error(e),
    };

    let summaries = match state.store.export_summaries(internal_id).await {
        Ok(s) => s,
        Err(e) => return internal_error(e),
    };

    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
    if wants_csv(accept, query.format.as_deref()) {
        let mut buf = String::from("id,group_id,window_start_ms,window_end_ms,created_at,text\n");
        for s in &summaries {
            buf.push_str(&csv_field(&s.id.to_string()));
            buf.push(',');
            buf.push_str(&csv_field(&s.group_id.to_string()));
            buf.push(',');
            buf.push_str(&csv_field(&s.window_start_ms.to_string()));
            buf.push(',');
            buf.push_str(&csv_field(&s.window_end_ms.to_string()));
            buf.push(',');
            buf.push_str(&csv_field(&s.created_at));
            buf.push(',');
            buf.push_str(&csv_field(&s.text));
            buf.push('\n');
        }
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
            .body(Body::from(buf))
            .unwrap()
            .into_response();
    }

    let mut buf = String::new();
    for s in &summaries {
        let line = serde_json::json!({
            "id": s.id,
            "group_id": s.group_id,
            "window_start_ms": s.window_start_ms,
            "window_end_ms": s.window_end_ms,
            "created_at": s.created_at,
            "text": s.text,
        });
        buf.push_str(&line.to_string());
        buf.push('\n');
    }
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson; charset=utf-8")
        .body(Body::from(buf))
        .unwrap()
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_field_quotes_commas_and_quotes() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn wants_csv_prefers_explicit_format_param() {
        assert!(wants_csv(Some("application/json"), Some("csv")));
        assert!(!wants_csv(Some("text/csv"), Some("json")));
    }

    #[test]
    fn wants_csv_falls_back_to_accept_header() {
        assert!(wants_csv(Some("text/csv"), None));
        assert!(!wants_csv(Some("application/json"), None));
        assert!(!wants_csv(None, None));
    }
}
