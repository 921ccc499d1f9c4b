//! FTP banner and explicit-TLS support check.

use std::time::Duration;

use log::debug;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error_handling::ProbeError;
use crate::models::Target;

use super::endpoint_of;

/// Reply code for "security mechanism accepted".
const AUTH_ACCEPTED: u16 = 234;

/// Reads one (possibly multi-line) FTP reply. Returns the code and full text.
async fn read_reply<R>(reader: &mut R) -> Result<(u16, String), ProbeError>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut text = String::new();
    let mut line = String::new();
    let mut code: Option<u16> = None;
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| ProbeError::Failed(format!("reading reply: {e}")))?;
        if read == 0 {
            return Err(ProbeError::Failed("connection closed mid-reply".to_string()));
        }
        text.push_str(&line);
        let this_code = line.get(..3).and_then(|c| c.parse::<u16>().ok());
        match (code, this_code) {
            (None, Some(c)) => {
                code = Some(c);
                if line.as_bytes().get(3) != Some(&b'-') {
                    return Ok((c, text.trim_end().to_string()));
                }
            }
            (Some(c), Some(end)) if end == c && line.as_bytes().get(3) == Some(&b' ') => {
                return Ok((c, text.trim_end().to_string()));
            }
            (None, None) => {
                return Err(ProbeError::Failed(format!("not an FTP reply: {}", line.trim_end())))
            }
            _ => {}
        }
    }
}

pub(super) async fn probe(target: &Target, limit: Duration) -> Result<Value, ProbeError> {
    let (port, _) = endpoint_of(target)?;
    let address = (target.host(), port);

    let stream = match timeout(limit, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(ProbeError::Unreachable(format!("{}: {e}", target.address()))),
        Err(_) => return Err(ProbeError::Unreachable(format!("{}: connect timed out", target.address()))),
    };

    timeout(limit, converse(stream))
        .await
        .map_err(|_| ProbeError::Failed(format!("{}: FTP conversation timed out", target.address())))?
}

async fn converse(stream: TcpStream) -> Result<Value, ProbeError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (_, banner) = read_reply(&mut reader).await?;

    let mut supports_tls = false;
    let mut accepted_command = Value::Null;
    for command in ["AUTH TLS", "AUTH SSL"] {
        write_half
            .write_all(format!("{command}\r\n").as_bytes())
            .await
            .map_err(|e| ProbeError::Failed(format!("sending {command}: {e}")))?;
        let (code, reply) = read_reply(&mut reader).await?;
        debug!("{command} -> {reply}");
        if code == AUTH_ACCEPTED {
            supports_tls = true;
            accepted_command = Value::from(command);
            break;
        }
    }

    // The server now expects a TLS handshake, or the session is useless; either way, leave.
    if !supports_tls {
        let _ = write_half.write_all(b"QUIT\r\n").await;
    }

    Ok(json!({
        "reachable": true,
        "banner": banner,
        "supports_tls": supports_tls,
        "tls_command": accepted_command,
    }))
}
