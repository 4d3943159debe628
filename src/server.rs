use std::io;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::model::{RecordId, RecordVersion};
use crate::protocol::{
    self, write_reply, PutReply, PutRequest, OP_COMPACT, OP_DELETE, OP_LOAD, OP_PICK, OP_PUT, OP_RELOAD,
    OP_SEARCH, OP_SNAPSHOT, OP_TEMPLATE, STATUS_ERROR, STATUS_NOT_FOUND, STATUS_OK, STATUS_UNCHANGED,
};
use crate::search::SearchQuery;
use crate::session::{EntrySession, Publication};
use crate::store::Vault;
use crate::template::Template;
use crate::{HistoryRetention, VaultDb};

pub struct VaultServer {
    db: Arc<VaultDb>,
    config: SessionConfig,
}

impl VaultServer {
    pub fn new(db: Arc<VaultDb>, config: SessionConfig) -> Self {
        Self { db, config }
    }

    pub async fn run(&self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "vault node listening");
        }

        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    let db = self.db.clone();
                    let config = self.config;
                    tokio::spawn(async move {
                        debug!(%peer, "client connected");
                        if let Err(e) = handle_client(socket, db, config).await {
                            warn!(%peer, error = %e, "client error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "connection failed"),
            }
        }
    }
}

/// One connection is one viewing session; this task is its main line.
async fn handle_client(mut stream: TcpStream, db: Arc<VaultDb>, config: SessionConfig) -> io::Result<()> {
    let mut session = EntrySession::new(config);
    let mut picks = session.history_selections();
    let vault: Arc<dyn Vault> = db.clone();

    while let Some((op_code, payload)) = protocol::read_request(&mut stream).await? {
        let mut writer = BufWriter::new(&mut stream);

        match op_code {
            // Writes
            OP_PUT      => handle_put(&mut writer, &payload, &db).await?,
            OP_TEMPLATE => handle_template(&mut writer, &payload, &db).await?,
            OP_DELETE   => handle_delete(&mut writer, &payload, &db).await?,
            OP_COMPACT  => handle_compact(&mut writer, &payload, &db).await?,
            OP_SEARCH   => handle_search(&mut writer, &payload, &db).await?,

            // Session
            OP_LOAD => {
                let Some((id, position)) = protocol::decode_load(&payload) else {
                    write_reply(&mut writer, STATUS_ERROR, b"").await?;
                    continue;
                };
                session.load_entry(Some(vault.clone()), Some(id), position);
                reply_publication(&mut writer, &mut session).await?;
            }
            OP_RELOAD => {
                if session.update_entry(Some(vault.clone())).is_none() {
                    write_reply(&mut writer, STATUS_NOT_FOUND, b"").await?;
                    continue;
                }
                reply_publication(&mut writer, &mut session).await?;
            }
            OP_SNAPSHOT => match session.snapshot() {
                Some(snapshot) => reply_json(&mut writer, &*snapshot).await?,
                None => write_reply(&mut writer, STATUS_NOT_FOUND, b"").await?,
            },
            OP_PICK => {
                let Ok(raw) = <[u8; 4]>::try_from(payload.as_slice()) else {
                    write_reply(&mut writer, STATUS_ERROR, b"").await?;
                    continue;
                };
                session.select_history_position(i32::from_le_bytes(raw));
                match picks.try_next() {
                    Some(selection) => reply_json(&mut writer, &selection).await?,
                    None => write_reply(&mut writer, STATUS_NOT_FOUND, b"").await?,
                }
            }

            _ => {
                warn!(op_code = format_args!("0x{:02X}", op_code), "unknown opcode");
                return Ok(());
            }
        }
    }
    Ok(())
}

async fn reply_json<W: AsyncWriteExt + Unpin, T: Serialize>(writer: &mut W, value: &T) -> io::Result<()> {
    match serde_json::to_vec(value) {
        Ok(body) => write_reply(writer, STATUS_OK, &body).await,
        Err(e) => {
            warn!(error = %e, "failed to encode reply");
            write_reply(writer, STATUS_ERROR, b"").await
        }
    }
}

async fn reply_publication<W: AsyncWriteExt + Unpin>(writer: &mut W, session: &mut EntrySession) -> io::Result<()> {
    // Requests on one connection are serialized, so this load is the only one in flight
    let outcome = session.settle().await;
    match (outcome.last(), session.snapshot()) {
        (Some(Publication::Applied), Some(snapshot)) => reply_json(writer, &*snapshot).await,
        _ => write_reply(writer, STATUS_UNCHANGED, b"").await,
    }
}

// --- WRITE HANDLERS ---

async fn handle_put<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8], db: &Arc<VaultDb>) -> io::Result<()> {
    let request: PutRequest = match serde_json::from_slice(data) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "malformed put body");
            return write_reply(writer, STATUS_ERROR, b"").await;
        }
    };

    let id = request.id.unwrap_or_default();
    let version = RecordVersion::new(id, request.template, request.fields);

    let db = db.clone();
    let res = tokio::task::spawn_blocking(move || db.put(&version).map_err(|e| e.to_string())).await;
    match res {
        Ok(Ok(offset)) => reply_json(writer, &PutReply { id, offset }).await,
        Ok(Err(e)) => {
            warn!(record = %id, error = %e, "put failed");
            write_reply(writer, STATUS_ERROR, b"").await
        }
        Err(e) => {
            warn!(record = %id, error = %e, "put task failed");
            write_reply(writer, STATUS_ERROR, b"").await
        }
    }
}

async fn handle_template<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8], db: &Arc<VaultDb>) -> io::Result<()> {
    let template: Template = match serde_json::from_slice(data) {
        Ok(template) => template,
        Err(_) => return write_reply(writer, STATUS_ERROR, b"").await,
    };
    let id = template.id;

    // The catalog rewrite is file I/O
    let db = db.clone();
    let res = tokio::task::spawn_blocking(move || db.register_template(template).map_err(|e| e.to_string())).await;
    match res {
        Ok(Ok(())) => reply_json(writer, &id).await,
        Ok(Err(e)) => {
            warn!(template = %id, error = %e, "template registration failed");
            write_reply(writer, STATUS_ERROR, b"").await
        }
        Err(e) => {
            warn!(template = %id, error = %e, "template task failed");
            write_reply(writer, STATUS_ERROR, b"").await
        }
    }
}

async fn handle_delete<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8], db: &Arc<VaultDb>) -> io::Result<()> {
    let Ok(raw) = <[u8; 16]>::try_from(data) else {
        return write_reply(writer, STATUS_ERROR, b"").await;
    };
    let id = RecordId::from_u128(u128::from_be_bytes(raw));

    let db = db.clone();
    let res = tokio::task::spawn_blocking(move || db.delete(id).map_err(|e| e.to_string())).await;
    match res {
        Ok(Ok(true)) => write_reply(writer, STATUS_OK, b"").await,
        Ok(Ok(false)) => write_reply(writer, STATUS_NOT_FOUND, b"").await,
        Ok(Err(e)) => {
            warn!(record = %id, error = %e, "delete failed");
            write_reply(writer, STATUS_ERROR, b"").await
        }
        Err(e) => {
            warn!(record = %id, error = %e, "delete task failed");
            write_reply(writer, STATUS_ERROR, b"").await
        }
    }
}

async fn handle_compact<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8], db: &Arc<VaultDb>) -> io::Result<()> {
    let retention: HistoryRetention = match serde_json::from_slice(data) {
        Ok(retention) => retention,
        Err(_) => return write_reply(writer, STATUS_ERROR, b"").await,
    };

    // Heavy I/O off the async workers. Map error to string for thread safety.
    let db = db.clone();
    let res = tokio::task::spawn_blocking(move || db.compact(retention).map_err(|e| e.to_string())).await;

    match res {
        Ok(Ok(stats)) => reply_json(writer, &stats).await,
        Ok(Err(e)) => {
            warn!(error = %e, "compaction failed");
            write_reply(writer, STATUS_ERROR, b"").await
        }
        Err(e) => {
            warn!(error = %e, "compaction task failed");
            write_reply(writer, STATUS_ERROR, b"").await
        }
    }
}

async fn handle_search<W: AsyncWriteExt + Unpin>(writer: &mut W, data: &[u8], db: &Arc<VaultDb>) -> io::Result<()> {
    let query: SearchQuery = match serde_json::from_slice(data) {
        Ok(query) => query,
        Err(_) => return write_reply(writer, STATUS_ERROR, b"").await,
    };

    // Reads every live frame
    let db = db.clone();
    let res = tokio::task::spawn_blocking(move || db.search(&query).map_err(|e| e.to_string())).await;
    match res {
        Ok(Ok(hits)) => reply_json(writer, &hits).await,
        Ok(Err(e)) => {
            warn!(error = %e, "search failed");
            write_reply(writer, STATUS_ERROR, b"").await
        }
        Err(e) => {
            warn!(error = %e, "search task failed");
            write_reply(writer, STATUS_ERROR, b"").await
        }
    }
}
