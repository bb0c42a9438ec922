use crate::handlers::MissionControl;
use aoc_core::job_contracts::OperationError;
use aoc_core::job_ipc::{
    encode_frame, FrameError, NdjsonFrameDecoder, OperationRequest, OperationResponse,
    DEFAULT_MAX_FRAME_BYTES,
};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Serves request frames from `reader` until EOF, writing one response frame
/// per line in arrival order. Undecodable lines get an `INVALID_REQUEST`
/// response without a request id.
pub async fn serve<R, W>(control: Arc<MissionControl>, reader: R, mut writer: W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = reader;
    let mut decoder = NdjsonFrameDecoder::<OperationRequest>::new(DEFAULT_MAX_FRAME_BYTES);
    let mut read_buf = [0u8; 8192];
    let mut served = 0u64;

    loop {
        let read = reader.read(&mut read_buf).await?;
        let report = if read == 0 {
            decoder.finish()
        } else {
            decoder.push_chunk(&read_buf[..read])
        };

        for entry in report.entries {
            let response = match entry {
                Ok(request) => {
                    served += 1;
                    dispatch(control.clone(), request).await
                }
                Err(err) => {
                    warn!(event = "mission_control_decode_error", error = %err);
                    decode_failure(&err)
                }
            };
            send_response(&mut writer, &response).await?;
        }

        if read == 0 {
            break;
        }
    }

    info!(event = "mission_control_stdio_closed", served);
    Ok(())
}

/// Runs one request on the blocking pool; store calls are synchronous.
pub async fn dispatch(control: Arc<MissionControl>, request: OperationRequest) -> OperationResponse {
    debug!(event = "mission_control_request", method = %request.method);
    let request_id = request.request_id.clone();
    match tokio::task::spawn_blocking(move || control.call(&request)).await {
        Ok(response) => response,
        Err(err) => {
            warn!(event = "mission_control_handler_panic", error = %err);
            OperationResponse::failure(
                request_id,
                OperationError::internal(format!("handler failed: {err}")),
            )
        }
    }
}

fn decode_failure(err: &FrameError) -> OperationResponse {
    OperationResponse::failure(
        None,
        OperationError::invalid_request(format!("Malformed request: {err}")),
    )
}

async fn send_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &OperationResponse,
) -> io::Result<()> {
    let frame = match encode_frame(response, DEFAULT_MAX_FRAME_BYTES) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(event = "mission_control_encode_error", error = %err);
            let fallback = OperationResponse::failure(
                response.request_id.clone(),
                OperationError::internal(format!("Response not encodable: {err}")),
            );
            encode_frame(&fallback, DEFAULT_MAX_FRAME_BYTES)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?
        }
    };
    writer.write_all(&frame).await?;
    writer.flush().await
}
