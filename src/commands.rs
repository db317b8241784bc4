//! Client-side subcommands that talk to a running server over HTTP.

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use serde_json::Value;

use pairline_core::{FrameDecoder, StreamEventKind};

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}

/// Follow the event stream until the server closes it.
pub async fn watch(base: &str) -> Result<()> {
    let url = endpoint(base, "/auth/getqr/stream");
    let resp = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?
        .error_for_status()?;

    let mut body = resp.bytes_stream();
    let mut decoder = FrameDecoder::new();
    let mut carry: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        carry.extend_from_slice(&chunk.context("stream interrupted")?);
        let text = take_utf8(&mut carry);
        for event in decoder.push(&text) {
            let label = match event.kind {
                StreamEventKind::Status => "status",
                StreamEventKind::Qr => "qr",
                StreamEventKind::Code => "code",
                StreamEventKind::Unknown => continue,
            };
            println!("{label:<6} {}", event.data);
        }
    }
    println!("stream closed");
    Ok(())
}

/// Split off the longest valid UTF-8 prefix, leaving an incomplete trailing
/// sequence in `buf` for the next chunk.
fn take_utf8(buf: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(buf) {
        Ok(s) => s.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => {
            let text = String::from_utf8_lossy(buf).into_owned();
            buf.clear();
            return text;
        }
    };
    let rest = buf.split_off(valid);
    let text = String::from_utf8_lossy(buf).into_owned();
    *buf = rest;
    text
}

pub async fn restart(base: &str) -> Result<()> {
    let body = post(base, "/auth/getqr/new", None).await?;
    println!("restart scheduled: {body}");
    Ok(())
}

pub async fn logout(base: &str) -> Result<()> {
    let body = post(base, "/auth/logout", None).await?;
    println!("logged out: {body}");
    Ok(())
}

pub async fn send(base: &str, phone: &str, text: &str) -> Result<()> {
    let payload = serde_json::json!({ "phone": phone, "text": text });
    let body = post(base, "/auth/testsend", Some(payload)).await?;
    match body.get("id").and_then(Value::as_str) {
        Some(id) => println!("sent: {id}"),
        None => println!("sent"),
    }
    Ok(())
}

async fn post(base: &str, path: &str, payload: Option<Value>) -> Result<Value> {
    let url = endpoint(base, path);
    let mut request = reqwest::Client::new().post(&url);
    if let Some(payload) = payload {
        request = request.json(&payload);
    }
    let resp = request
        .send()
        .await
        .with_context(|| format!("failed to reach {url}"))?;

    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    if !status.is_success() || body.get("ok") == Some(&Value::Bool(false)) {
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("request failed");
        bail!("{status}: {reason}");
    }
    Ok(body)
}
