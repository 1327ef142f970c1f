//! The server demultiplexer (§4.7): accepts tunnel connections, and for
//! each REQUEST opens the requested target, assigns it a channel id, and
//! pumps bytes between the target socket and the tunnel.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use tracing::{debug, info, warn};

use crate::core::communication::framing::Reassembler;
use crate::core::communication::negotiation;
use crate::core::communication::socks::{Address, Message, Reply};
use crate::core::communication::Frame;
use crate::core::config::Config;
use crate::core::crypto::FuzzChain;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::tunnel::{self, TunnelSender};

struct TargetEntry {
    to_target: mpsc::UnboundedSender<Vec<u8>>,
}

type Channels = Arc<Mutex<HashMap<u32, TargetEntry>>>;

static NEXT_REMOTE_ID: AtomicU32 = AtomicU32::new(1);

/// Runs the server role forever: accepts tunnel connections on
/// `cfg.server_addr()`, negotiating and then serving each one on its own
/// task. Nothing prevents several tunnels being open at once.
pub async fn run(cfg: Config) -> Result<()> {
    let listener = TcpListener::bind(cfg.server_addr()).await?;
    info!(addr = %cfg.server_addr(), "tunnel server listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        info!(%peer, "tunnel connection accepted");
        let cfg = cfg.clone_for_task();
        tokio::spawn(async move {
            if let Err(e) = serve_tunnel(socket, cfg).await {
                warn!(%peer, error = %e, "tunnel ended with error");
            }
        });
    }
}

async fn serve_tunnel(mut socket: TcpStream, cfg: TaskConfig) -> Result<()> {
    let fuzz = negotiation::server_handshake(&mut socket, &cfg.password).await?;
    info!("tunnel negotiated");
    let fuzz = Arc::new(fuzz);

    let (mut tunnel_read, tunnel_write) = socket.into_split();
    let tunnel_tx = tunnel::spawn_writer(tunnel_write);
    let channels: Channels = Arc::new(Mutex::new(HashMap::new()));

    let mut reassembler = Reassembler::new();
    loop {
        let frames = tunnel::read_frames(&mut tunnel_read, &mut reassembler, &fuzz).await?;
        for frame in frames {
            handle_frame(frame, &tunnel_tx, &fuzz, &channels, &cfg).await?;
        }
    }
}

/// Cheaply clonable slice of [`Config`] a spawned tunnel task needs.
#[derive(Clone)]
struct TaskConfig {
    password: String,
    timeout: Duration,
}

impl Config {
    fn clone_for_task(&self) -> TaskConfig {
        TaskConfig {
            password: self.password.clone(),
            timeout: Duration::from_secs(self.timeout_seconds),
        }
    }
}

async fn handle_frame(
    frame: Frame,
    tunnel_tx: &TunnelSender,
    fuzz: &Arc<FuzzChain>,
    channels: &Channels,
    cfg: &TaskConfig,
) -> Result<()> {
    match frame {
        Frame::Request { src: user_id, message, .. } => {
            if message.msg != Message::CMD_CONNECT {
                warn!(user_id, cmd = message.msg, "unsupported socks command");
                let reply = Message::reply(
                    Reply::CommandNotSupported,
                    Address::Ipv4(Ipv4Addr::UNSPECIFIED),
                    0,
                );
                let _ = tunnel_tx.send(
                    &Frame::Reply {
                        src: 0,
                        dst: user_id,
                        message: reply,
                    },
                    fuzz,
                );
                return Ok(());
            }
            let tunnel_tx = tunnel_tx.clone();
            let fuzz = Arc::clone(fuzz);
            let channels = Arc::clone(channels);
            let cfg = cfg.clone();
            tokio::spawn(async move {
                connect_target(user_id, message, tunnel_tx, fuzz, channels, cfg).await;
            });
        }
        Frame::Relaying { src: user_id, payload, .. } => {
            let guard = channels.lock().await;
            if let Some(entry) = guard.get(&user_id) {
                let _ = entry.to_target.send(payload);
            }
        }
        Frame::Close { src: user_id } => {
            channels.lock().await.remove(&user_id);
        }
        Frame::MalformedRequest { src: user_id } => {
            warn!(user_id, "request body failed to parse as socks5");
            let reply = Message::reply(
                Reply::GeneralFailure,
                Address::Ipv4(Ipv4Addr::UNSPECIFIED),
                0,
            );
            let _ = tunnel_tx.send(
                &Frame::Reply {
                    src: 0,
                    dst: user_id,
                    message: reply,
                },
                fuzz,
            );
        }
        Frame::Hello { .. } | Frame::Handshake { .. } => {
            // §4.5: a HELLO or HANDSHAKE out of order closes the tunnel.
            return Err(Error::simple(ErrorKind::Protocol));
        }
        other => warn!(?other, "unexpected frame on an established tunnel"),
    }
    Ok(())
}

/// Resolves and connects to `message`'s target, replies over the tunnel,
/// and if successful pumps bytes between the target and the tunnel until
/// either side closes (§4.7).
async fn connect_target(
    user_id: u32,
    message: Message,
    tunnel_tx: TunnelSender,
    fuzz: Arc<FuzzChain>,
    channels: Channels,
    cfg: TaskConfig,
) {
    let target_addr = format!("{}:{}", message.address, message.port);
    info!(user_id, target = %target_addr, "connecting");

    let target = match timeout(cfg.timeout, TcpStream::connect(&target_addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(user_id, target = %target_addr, error = %e, "connect failed");
            send_failure_reply(user_id, &tunnel_tx, &fuzz);
            return;
        }
        Err(_) => {
            warn!(user_id, target = %target_addr, "connect timed out");
            send_failure_reply(user_id, &tunnel_tx, &fuzz);
            return;
        }
    };

    let remote_id = NEXT_REMOTE_ID.fetch_add(1, Ordering::Relaxed);
    let bind_addr = target.local_addr().ok();
    let (bind_ip, bind_port) = match bind_addr {
        Some(std::net::SocketAddr::V4(a)) => (*a.ip(), a.port()),
        _ => (Ipv4Addr::UNSPECIFIED, 0),
    };

    let reply = Message::reply(Reply::Succeeded, Address::Ipv4(bind_ip), bind_port);
    if tunnel_tx
        .send(
            &Frame::Reply {
                src: remote_id,
                dst: user_id,
                message: reply,
            },
            &fuzz,
        )
        .is_err()
    {
        return;
    }

    let (to_target_tx, mut to_target_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    channels
        .lock()
        .await
        .insert(user_id, TargetEntry { to_target: to_target_tx });

    debug!(user_id, remote_id, "channel opened");
    let (mut target_rd, mut target_wr) = target.into_split();
    let mut buf = [0u8; 4096];

    loop {
        tokio::select! {
            incoming = to_target_rx.recv() => {
                match incoming {
                    Some(payload) => {
                        if tokio::io::AsyncWriteExt::write_all(&mut target_wr, &payload).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            result = target_rd.read(&mut buf) => {
                let n = match result {
                    Ok(n) => n,
                    Err(_) => {
                        let _ = tunnel_tx.send(&Frame::Close { src: user_id }, &fuzz);
                        break;
                    }
                };
                if n == 0 {
                    let _ = tunnel_tx.send(&Frame::Close { src: user_id }, &fuzz);
                    break;
                }
                if tunnel_tx
                    .send(
                        &Frame::Relaying {
                            src: remote_id,
                            dst: user_id,
                            payload: buf[..n].to_vec(),
                        },
                        &fuzz,
                    )
                    .is_err()
                {
                    break;
                }
            }
        }
    }

    channels.lock().await.remove(&user_id);
    debug!(user_id, remote_id, "channel closed");
}

fn send_failure_reply(user_id: u32, tunnel_tx: &TunnelSender, fuzz: &FuzzChain) {
    let reply = Message::reply(
        Reply::NetworkUnreachable,
        Address::Ipv4(Ipv4Addr::new(255, 255, 255, 255)),
        0,
    );
    let _ = tunnel_tx.send(
        &Frame::Reply {
            src: 0,
            dst: user_id,
            message: reply,
        },
        fuzz,
    );
}
