//! Line-oriented policy service.
//!
//! Each request line is `<ip>` or `<ip> <sender>`; each response line is
//! `DENY <message>`, `ALLOW <message>`, `DUNNO` or `ERROR <reason>`.

use crate::codec::parse_ip;
use crate::service::DnsList;
use crate::types::{Decision, DecisionCode, Peer};
use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

const MAX_REQUEST_LEN: usize = 1024;

pub struct PolicyServer {
    service: Arc<DnsList>,
}

impl PolicyServer {
    pub fn new(service: Arc<DnsList>) -> Self {
        Self { service }
    }

    /// Binds `listen` and serves until a reload is signalled (`Ok(true)`)
    /// or the process is interrupted (`Ok(false)`).
    pub async fn run(&self, listen: &str, reload_rx: watch::Receiver<bool>) -> Result<bool> {
        let listener = TcpListener::bind(listen).await?;
        tracing::info!("🚀 Policy service listening on {}", listener.local_addr()?);
        self.serve(listener, reload_rx).await
    }

    pub async fn serve(&self, listener: TcpListener, mut reload_rx: watch::Receiver<bool>) -> Result<bool> {
        let service = self.service.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, src)) => {
                        let service = service.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(&service, stream).await {
                                tracing::debug!("[server] connection from {} closed: {}", src, e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("[server] accept failed: {}", e),
                }
            }
        });

        let is_reload = tokio::select! {
            changed = reload_rx.changed() => changed.is_ok(),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                false
            }
        };
        // Wait for the listener to drop so the next generation can rebind.
        accept_task.abort();
        let _ = accept_task.await;
        Ok(is_reload)
    }
}

async fn handle_connection(service: &DnsList, stream: TcpStream) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let response = if line.len() > MAX_REQUEST_LEN {
            "ERROR request too long".to_string()
        } else {
            answer(service, &line).await
        };
        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}

/// Runs the connect-stage decision and, for bounces, the backscatter check.
/// Allow-listed peers skip the latter only when `ok_mail` is set.
pub async fn answer(service: &DnsList, line: &str) -> String {
    let mut parts = line.split_whitespace();
    let Some(ip) = parts.next() else {
        return "ERROR empty request".to_string();
    };
    let peer = match parse_ip(ip) {
        Ok(ip) => Peer::from(ip),
        Err(e) => return format!("ERROR {}", e),
    };

    let decision = service.enforce(service.decide(&peer).await);
    if decision.code == DecisionCode::Deny || service.skips_mail_checks(&decision) {
        return render(&decision);
    }

    let Some(sender) = parts.next() else {
        return render(&decision);
    };
    let bounce = service.enforce(service.check_sender(&peer, sender).await);
    if bounce.code == DecisionCode::Deny {
        return render(&bounce);
    }
    render(&decision)
}

pub fn render(decision: &Decision) -> String {
    let message = decision.message.as_deref().unwrap_or_default();
    match decision.code {
        DecisionCode::Deny => format!("DENY {}", message),
        DecisionCode::Allow => format!("ALLOW {}", message),
        DecisionCode::Undetermined => "DUNNO".to_string(),
    }
}
