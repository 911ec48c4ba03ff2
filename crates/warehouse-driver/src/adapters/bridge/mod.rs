mod handler;
mod io;
mod protocol;

use std::{
    io::{BufRead, Write},
    sync::Arc,
};

use crate::{
    cli::Args,
    core::{
        local::LocalWarehouse,
        retry::RetryPolicy,
        warehouse::{SchemaReflection, WarehouseClient},
    },
    error::{AppError, AppResult},
};

use handler::BridgeHandler;
use io::NdjsonIo;
use protocol::{BridgeRequest, PROTOCOL_VERSION};

pub fn run(args: Args) -> AppResult<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::internal(e.to_string()))?;

    let warehouse = LocalWarehouse::open(&args.warehouse_dir)?;
    tracing::info!(
        root = %warehouse.root().display(),
        datasets = warehouse.datasets().len(),
        "warehouse ready"
    );
    let handler = BridgeHandler::new(Arc::new(warehouse), RetryPolicy::from_args(&args));

    rt.block_on(serve(&mut NdjsonIo::stdio(), &handler))
}

async fn serve<R, W, C>(io: &mut NdjsonIo<R, W>, handler: &BridgeHandler<C>) -> AppResult<()>
where
    R: BufRead,
    W: Write,
    C: WarehouseClient + SchemaReflection + 'static,
{
    loop {
        let Some(line) = io.read_line()? else { break };
        if line.is_empty() {
            continue;
        }

        let req: BridgeRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                // no id to echo back
                let _ = io.protocol_error(String::new(), PROTOCOL_VERSION, e.to_string());
                continue;
            }
        };

        let resp = handler.handle(req).await;
        io.write_json_line(&resp)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::local::test_support;
    use std::{io::Cursor, time::Duration};

    #[tokio::test]
    async fn serves_one_response_per_request_line() {
        let (_dir, warehouse) = test_support::warehouse();
        let handler = BridgeHandler::new(
            Arc::new(warehouse),
            RetryPolicy {
                max_attempts: 1,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
                timeout: Duration::from_secs(5),
            },
        );
        let input = concat!(
            r#"{"v":1,"id":"a","cmd":"columns","payload":{"dataset":"sales","table":"orders"}}"#,
            "\n\n",
            "not json\n",
            r#"{"v":1,"id":"b","cmd":"classify","payload":{"status_code":429,"message":""}}"#,
            "\n",
        );
        let mut io = NdjsonIo::new(Cursor::new(input), Vec::new());
        serve(&mut io, &handler).await.unwrap();

        let output = String::from_utf8(io.into_writer().unwrap()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["id"], "a");
        assert_eq!(lines[0]["status"], "ok");
        assert_eq!(lines[1]["code"], "INVALID_REQUEST");
        assert_eq!(lines[2]["data"]["retryable"], true);
    }
}
