//! Chunk-transfer server: length-delimited JSON framing over TCP
//! (spec 4.9). One newline-terminated JSON request per line; `GET_CHUNK`
//! replies with a JSON header followed immediately by `size` raw bytes.

use std::sync::Arc;

use meshcas_core::wire::{TransferRequest, TransferResponse};
use meshcas_store::Cas;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Accept loop for the chunk-transfer server. Runs until the listener
/// errors out; each connection is handled on its own task so one slow
/// peer never blocks another (spec 5: this may run on a dedicated OS
/// thread relative to the DHT's event loop — here, a separate tokio
/// task, which gives the same isolation without sharing mutable state
/// except through the append-only CAS).
pub async fn serve(cas: Arc<Cas>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let cas = cas.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, cas).await {
                        tracing::debug!(%peer, error = %e, "chunk connection closed");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "chunk-transfer accept loop failed");
                break;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, cas: Arc<Cas>) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(()); // peer closed the connection
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: TransferRequest = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                write_response(&mut writer, &TransferResponse::Error { message: e.to_string() })
                    .await?;
                continue;
            }
        };

        match request {
            TransferRequest::GetChunk { chunk_hash } => match cas.chunk_cache().get(&chunk_hash) {
                Ok(Some(bytes)) => {
                    write_response(
                        &mut writer,
                        &TransferResponse::ChunkStart { size: bytes.len() as u64 },
                    )
                    .await?;
                    writer.write_all(&bytes).await?;
                }
                Ok(None) => {
                    write_response(
                        &mut writer,
                        &TransferResponse::Error { message: format!("chunk not found: {chunk_hash}") },
                    )
                    .await?;
                }
                Err(e) => {
                    write_response(&mut writer, &TransferResponse::Error { message: e.to_string() })
                        .await?;
                }
            },
            TransferRequest::ListFiles => {
                let files = cas.list_manifests();
                write_response(&mut writer, &TransferResponse::FileList { files }).await?;
            }
            TransferRequest::GetFileMetadata { file_hash } => match cas.get_manifest(&file_hash) {
                Some(manifest) => {
                    write_response(&mut writer, &TransferResponse::FileMetadata(manifest)).await?;
                }
                None => {
                    write_response(
                        &mut writer,
                        &TransferResponse::Error { message: format!("no manifest for {file_hash}") },
                    )
                    .await?;
                }
            },
        }
    }
}

async fn write_response<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    response: &TransferResponse,
) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}
