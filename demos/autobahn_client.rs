//! Runs the Autobahn|Testsuite client cases against a fuzzing server on localhost:9001.
use anyhow::Result;
use wsraw::{CloseCode, Incoming, Options, WebSocket};

async fn connect(path: &str) -> Result<WebSocket> {
    let options = Options::default()
        .with_max_payload_read(100 * 1024 * 1024)
        .with_max_read_buffer(200 * 1024 * 1024);
    let ws = WebSocket::connect(format!("ws://localhost:9001/{path}").parse()?, options).await?;
    Ok(ws)
}

async fn get_case_count() -> Result<u32> {
    let mut ws = connect("getCaseCount").await?;
    let count = match ws.next_event().await {
        Some(Incoming::Message { payload, .. }) => std::str::from_utf8(&payload)?.parse()?,
        other => anyhow::bail!("expected the case count, got {other:?}"),
    };
    ws.close(CloseCode::Normal, "").await?;
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<()> {
    simple_logger::init_with_level(log::Level::Debug).expect("log");

    let count = get_case_count().await?;
    log::debug!("Running {count} cases");

    for case in 1..=count {
        log::debug!("Running {case}");

        let mut ws = connect(&format!("runCase?case={case}&agent=wsraw")).await?;
        while let Some(event) = ws.next_event().await {
            if let Incoming::Message { payload, is_binary } = event {
                ws.send(&payload, is_binary).await?;
            }
        }
    }

    let mut ws = connect("updateReports?agent=wsraw").await?;
    ws.close(CloseCode::Normal, "").await?;

    Ok(())
}
