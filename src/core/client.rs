//! The client multiplexer (§4.6): accepts SOCKS5 user agents, assigns
//! each a channel id, forwards its CONNECT through the tunnel, and pumps
//! bytes in both directions until either side closes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use std::net::Ipv4Addr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use tracing::{debug, info, warn};

use crate::core::communication::framing::Reassembler;
use crate::core::communication::negotiation;
use crate::core::communication::socks::{Address, ClientGreeting, Message, Reply, ServerGreeting};
use crate::core::communication::Frame;
use crate::core::config::Config;
use crate::core::crypto::FuzzChain;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::tunnel::{self, TunnelSender};

/// Messages the tunnel dispatch loop pushes to a user's pump task.
enum ToUser {
    Reply { remote_id: u32, message: Message },
    Payload(Vec<u8>),
    Closed,
}

/// Mirrors the channel states of §3: a client-side channel is in `Cmd`
/// from the moment its REQUEST is emitted until its REPLY arrives, then
/// `Data` for the rest of its life.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Cmd,
    Data,
}

struct UserEntry {
    to_user: mpsc::UnboundedSender<ToUser>,
    state: ChannelState,
}

type Users = Arc<Mutex<HashMap<u32, UserEntry>>>;

/// Runs the client role forever: negotiates the tunnel, then accepts
/// user agents on `cfg.client_addr()` until the process is killed or the
/// tunnel dies.
pub async fn run(cfg: Config) -> Result<()> {
    info!(addr = %cfg.server_addr(), "connecting to tunnel server");
    let mut tunnel_stream = TcpStream::connect(cfg.server_addr()).await?;

    let fuzz = negotiation::client_handshake(&mut tunnel_stream, &cfg.password).await?;
    info!("tunnel negotiated");
    let fuzz = Arc::new(fuzz);

    let (tunnel_read, tunnel_write) = tunnel_stream.into_split();
    let tunnel_tx = tunnel::spawn_writer(tunnel_write);

    let users: Users = Arc::new(Mutex::new(HashMap::new()));
    let next_user_id = Arc::new(AtomicU32::new(1));

    tokio::spawn(dispatch_loop(tunnel_read, Arc::clone(&fuzz), Arc::clone(&users)));

    let listener = TcpListener::bind(cfg.client_addr()).await?;
    info!(addr = %cfg.client_addr(), "socks5 listener ready");

    loop {
        let (socket, peer) = listener.accept().await?;
        debug!(%peer, "user accepted");
        let users = Arc::clone(&users);
        let tunnel_tx = tunnel_tx.clone();
        let fuzz = Arc::clone(&fuzz);
        let user_id = next_user_id.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            if let Err(e) = handle_user(socket, user_id, tunnel_tx, fuzz, users).await {
                warn!(user_id, error = %e, "user session ended with error");
            }
        });
    }
}

/// Reads frames off the tunnel forever, routing each to the user pump
/// task it belongs to. Returning ends the client process — a dead
/// tunnel has no way to recover, matching the Python original's
/// `tunnel_done` callback exiting the process.
async fn dispatch_loop(mut read_half: tokio::net::tcp::OwnedReadHalf, fuzz: Arc<FuzzChain>, users: Users) {
    let mut reassembler = Reassembler::new();
    loop {
        let frames = match tunnel::read_frames(&mut read_half, &mut reassembler, &fuzz).await {
            Ok(frames) => frames,
            Err(e) => {
                warn!(error = %e, "tunnel closed");
                break;
            }
        };
        let mut protocol_error = false;
        for frame in frames {
            if let Err(e) = dispatch_frame(frame, &users).await {
                warn!(error = %e, "protocol error on established tunnel, closing");
                protocol_error = true;
                break;
            }
        }
        if protocol_error {
            break;
        }
    }
    // the tunnel is gone; nothing more will ever resolve these channels.
    for (_, entry) in users.lock().await.drain() {
        let _ = entry.to_user.send(ToUser::Closed);
    }
}

/// Routes one tunnel frame to the user pump task it belongs to.
///
/// Returns a `Protocol` error (closing the tunnel, per §4.6's tie-breaks)
/// for a RELAYING that names a channel still waiting on its REPLY —
/// everything else either updates a channel's state or is silently
/// dropped for an id neither side holds open anymore.
async fn dispatch_frame(frame: Frame, users: &Users) -> Result<()> {
    match frame {
        Frame::Reply { src, dst, message } => {
            let mut guard = users.lock().await;
            if let Some(entry) = guard.get_mut(&dst) {
                entry.state = ChannelState::Data;
                let _ = entry.to_user.send(ToUser::Reply {
                    remote_id: src,
                    message,
                });
            }
        }
        Frame::Relaying { dst, payload, .. } => {
            let guard = users.lock().await;
            if let Some(entry) = guard.get(&dst) {
                if entry.state != ChannelState::Data {
                    return Err(Error::simple(ErrorKind::Protocol));
                }
                let _ = entry.to_user.send(ToUser::Payload(payload));
            }
        }
        Frame::Close { src: user_id } => {
            let mut guard = users.lock().await;
            if let Some(entry) = guard.remove(&user_id) {
                let _ = entry.to_user.send(ToUser::Closed);
            }
        }
        Frame::Hello { .. } | Frame::Handshake { .. } => {
            // §4.5: a HELLO or HANDSHAKE out of order closes the tunnel.
            return Err(Error::simple(ErrorKind::Protocol));
        }
        other => warn!(?other, "unexpected frame on an established tunnel"),
    }
    Ok(())
}

/// Drives one user agent through ACCEPT → GREETED → CONNECTED → PIPING
/// → CLOSED (§4.6).
async fn handle_user(
    socket: TcpStream,
    user_id: u32,
    tunnel_tx: TunnelSender,
    fuzz: Arc<FuzzChain>,
    users: Users,
) -> Result<()> {
    let (mut user_rd, mut user_wr) = socket.into_split();

    let greeting = ClientGreeting::read_from(&mut user_rd).await?;
    debug!(user_id, methods = ?greeting.methods, "socks5 greeting");
    user_wr.write_all(&ServerGreeting::no_auth().serialize()).await?;

    let request = Message::read_from(&mut user_rd).await?;
    if request.msg != Message::CMD_CONNECT {
        let reply = Message::reply(Reply::CommandNotSupported, Address::Ipv4(Ipv4Addr::UNSPECIFIED), 0);
        user_wr.write_all(&reply.serialize()).await?;
        return Ok(());
    }
    info!(user_id, target = %request.address, port = request.port, "connecting");

    let (to_user_tx, mut to_user_rx) = mpsc::unbounded_channel::<ToUser>();
    users.lock().await.insert(
        user_id,
        UserEntry {
            to_user: to_user_tx,
            state: ChannelState::Cmd,
        },
    );

    tunnel_tx.send(
        &Frame::Request {
            src: user_id,
            dst: 0,
            message: request,
        },
        &fuzz,
    )?;

    let mut remote_id: Option<u32> = None;
    let mut buf = [0u8; 4096];

    let result: Result<()> = loop {
        tokio::select! {
            incoming = to_user_rx.recv() => {
                match incoming {
                    Some(ToUser::Reply { remote_id: r, message }) => {
                        let succeeded = message.reply_code() == Some(Reply::Succeeded);
                        user_wr.write_all(&message.serialize()).await?;
                        if succeeded {
                            remote_id = Some(r);
                        } else {
                            break Ok(());
                        }
                    }
                    Some(ToUser::Payload(payload)) => {
                        user_wr.write_all(&payload).await?;
                    }
                    Some(ToUser::Closed) | None => break Ok(()),
                }
            }
            result = user_rd.read(&mut buf), if remote_id.is_some() => {
                let n = match result {
                    Ok(n) => n,
                    Err(e) => {
                        let _ = tunnel_tx.send(&Frame::Close { src: user_id }, &fuzz);
                        break Err(e.into());
                    }
                };
                if n == 0 {
                    let _ = tunnel_tx.send(&Frame::Close { src: user_id }, &fuzz);
                    break Ok(());
                }
                if let Err(e) = tunnel_tx.send(
                    &Frame::Relaying {
                        src: user_id,
                        dst: remote_id.expect("checked by select guard"),
                        payload: buf[..n].to_vec(),
                    },
                    &fuzz,
                ) {
                    break Err(e);
                }
            }
        }
    };

    users.lock().await.remove(&user_id);
    debug!(user_id, "user session closed");
    result
}
