//! TCP Selector Hub (C4, §4.4): the chat login port every other component's
//! notifications eventually funnel through.
//!
//! Grounded in the teacher's `tcp_server` accept loop (`server.rs`): one
//! task per accepted connection, framing and dispatch on that task, writes
//! drained by a single dedicated task per connection so the "selector
//! thread only writes" discipline (§5, §9) becomes "only the writer task
//! touches the socket's write half" under tokio.

pub mod frame;
pub mod session;

use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::error::NexusError;
use crate::events::format_user_list;
use crate::presence::Anchor;
use crate::state::AppState;
use crate::whiteboard::{DrawCommand, WhiteboardError};

use frame::{parse_frame, Frame};
use session::{new_session, NewSession, SessionHandle};

/// Binds the chat port and accepts connections until the process exits.
pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(state.config.tcp.listen).await?;
    log::info!("tcp hub listening: addr={}", state.config.tcp.listen);

    loop {
        let (stream, peer) = listener.accept().await?;
        state.statistics.tcp_connections_accepted.fetch_add(1, Ordering::Relaxed);
        state.statistics.tcp_connections_active.fetch_add(1, Ordering::Relaxed);

        let state = state.clone();
        tokio::spawn(async move {
            handle_connection(state.clone(), stream, peer.ip()).await;
            state.statistics.tcp_connections_active.fetch_sub(1, Ordering::Relaxed);
        });
    }
}

async fn handle_connection(state: Arc<AppState>, stream: TcpStream, peer_ip: IpAddr) {
    let NewSession { handle, mut outbound_rx } = new_session();
    state.sessions.insert(handle.clone());
    let cancel = handle.cancellation();

    let (read_half, mut write_half) = stream.into_split();

    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                line = outbound_rx.recv() => {
                    let Some(line) = line else { break };
                    if write_half.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                    if write_half.write_all(b"\n").await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    read_loop(&state, &handle, peer_ip, read_half, &cancel).await;

    cancel.cancel();
    let _ = writer.await;
    teardown(&state, &handle).await;
}

async fn read_loop(
    state: &Arc<AppState>,
    handle: &SessionHandle,
    peer_ip: IpAddr,
    read_half: tokio::net::tcp::OwnedReadHalf,
    cancel: &tokio_util::sync::CancellationToken,
) {
    let mut reader = BufReader::new(read_half);
    let max_line = state.config.tcp.max_line_bytes as u64;

    loop {
        let mut line = String::new();
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            result = (&mut reader).take(max_line).read_line(&mut line) => result,
        };

        let n = match read {
            Ok(n) => n,
            Err(e) => {
                log::debug!("tcp session {} read error: {e}", handle.id());
                return;
            }
        };
        if n == 0 {
            return; // EOF
        }
        if !line.ends_with('\n') {
            // hit the per-line cap without finding a terminator (§4.4 "fatal session error").
            handle.enqueue("ERROR:line too long");
            return;
        }

        let trimmed = line.trim_end_matches(['\n', '\r']);
        match parse_frame(trimmed) {
            Ok(frame) => dispatch(state, handle, peer_ip, frame).await,
            Err(e) => handle.enqueue(&e.as_tcp_frame()),
        }
    }
}

async fn dispatch(state: &Arc<AppState>, handle: &SessionHandle, peer_ip: IpAddr, frame: Frame) {
    if let Frame::Login { user, pass, file_tcp, voice_udp } = frame {
        handle_login(state, handle, peer_ip, user, pass, file_tcp, voice_udp).await;
        return;
    }

    let Some(user) = handle.username() else {
        handle.enqueue(&NexusError::Protocol("login first".into()).as_tcp_frame());
        return;
    };

    match frame {
        Frame::Login { .. } => unreachable!(),
        Frame::Msg { text } => {
            match state.chat.broadcast(&user, &text) {
                Ok(_) => state.statistics.chat_messages.fetch_add(1, Ordering::Relaxed),
                Err(reason) => handle.enqueue(&format!("ERROR:{reason}")),
            };
        }
        Frame::Peer { user: target } => match state.presence.find(&target) {
            Some(p) => handle.enqueue(&format!(
                "PEER:{}:{}:{}:{}:{}",
                p.username,
                p.ip,
                p.file_tcp,
                p.voice_udp,
                p.transport_tag()
            )),
            None => handle.enqueue(&format!("PEER:{target}:offline")),
        },
        Frame::Users => handle.enqueue(&format_user_list(state.presence.snapshot())),
        Frame::WhiteboardOpen { peer } => {
            let sid = state.whiteboard.create(&user, &peer);
            handle.enqueue(&format!("WHITEBOARD_OPEN:{sid}"));
        }
        Frame::WhiteboardDraw { sid, x1, y1, x2, y2, color, thickness } => {
            match state.whiteboard.draw(sid, &user, x1, y1, x2, y2, color, thickness) {
                Ok(()) => {}
                Err(e) => handle.enqueue(&whiteboard_error_frame(e)),
            }
        }
        Frame::WhiteboardClear { sid } => match state.whiteboard.clear(sid, &user) {
            Ok(()) => {}
            Err(e) => handle.enqueue(&whiteboard_error_frame(e)),
        },
        Frame::WhiteboardClose { sid } => match state.whiteboard.close(sid, &user) {
            Ok(()) => handle.enqueue(&format!("WHITEBOARD_CLOSED:{sid}")),
            Err(e) => handle.enqueue(&whiteboard_error_frame(e)),
        },
        Frame::WhiteboardSync { sid } => match state.whiteboard.commands(sid, &user) {
            Ok(commands) => {
                let rendered: Vec<String> = commands.iter().map(format_draw_command).collect();
                handle.enqueue(&format!("WHITEBOARD_SYNC:{sid}:{}", rendered.join(";")));
            }
            Err(e) => handle.enqueue(&whiteboard_error_frame(e)),
        },
    }
}

async fn handle_login(
    state: &Arc<AppState>,
    handle: &SessionHandle,
    peer_ip: IpAddr,
    user: String,
    pass: String,
    file_tcp: Option<u16>,
    voice_udp: Option<u16>,
) {
    if handle.username().is_some() {
        handle.enqueue(&NexusError::Protocol("already logged in".into()).as_tcp_frame());
        return;
    }
    if !state.credentials.verify(&user, &pass) {
        handle.enqueue(&NexusError::Authentication("invalid credentials".into()).as_tcp_frame());
        return;
    }

    let outcome = state
        .presence
        .login(&user, peer_ip, file_tcp, voice_udp, true, Anchor::Tcp(handle.clone()));
    handle.set_username(&user);

    if let Some(evicted) = outcome.evicted {
        if let Some(Anchor::Tcp(previous)) = evicted.anchor {
            if previous.id() != handle.id() {
                previous.disconnect();
            }
        }
    }

    if let Some(port) = file_tcp {
        state.filetransfer.start_receiver(user.clone(), port, state.statistics.clone());
    }

    handle.enqueue(&format!("LOGIN_SUCCESS:{user}"));
    handle.enqueue(&format_user_list(state.presence.snapshot()));

    state.sessions.broadcast(&format!("USER_JOINED:{user}:nio"), Some(&user));
    state.sessions.broadcast(&format_user_list(state.presence.snapshot()), None);
}

async fn teardown(state: &Arc<AppState>, handle: &SessionHandle) {
    state.sessions.remove(handle.id());

    let Some(user) = handle.username() else { return };
    if state.presence.remove_anchored_by(&user, handle.id()).is_some() {
        state.filetransfer.stop_receiver(&user);
        state.sessions.broadcast(&format!("USER_LEFT:{user}"), None);
        state.sessions.broadcast(&format_user_list(state.presence.snapshot()), None);
    }
}

fn whiteboard_error_frame(e: WhiteboardError) -> String {
    match e {
        WhiteboardError::NotFound => NexusError::NotFound("session".into()).as_tcp_frame(),
        WhiteboardError::Forbidden => NexusError::Authorization("not in session".into()).as_tcp_frame(),
    }
}

fn format_draw_command(cmd: &DrawCommand) -> String {
    match cmd {
        DrawCommand::Draw { user, x1, y1, x2, y2, color, thickness } => {
            format!("draw:{user}:{x1:.2}:{y1:.2}:{x2:.2}:{y2:.2}:{color}:{thickness:.2}")
        }
        DrawCommand::Clear { user } => format!("clear:{user}"),
    }
}
