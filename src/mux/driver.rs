//! The single connection task.
//!
//! One task owns the transport, the `Conn` core and both halves of the
//! multiplexer's world: decoded frames arriving from the reader task and
//! commands arriving from application handles. Everything is processed
//! one-at-a-time, which is the whole concurrency story — there are no
//! locks around session state because nothing else can reach it.

use std::future::Future;
use std::io;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use futures::channel::mpsc::unbounded;
use futures::channel::mpsc::UnboundedReceiver;
use futures::channel::mpsc::UnboundedSender;
use futures::stream::StreamExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::codec::framed_read::FramedRead;
use crate::error::Error;
use crate::headers::HeaderCodec;
use crate::mux::cell::SessionCell;
use crate::mux::command::Command;
use crate::mux::conf::Config;
use crate::mux::conn::Conn;
use crate::mux::event::SessionEvent;
use crate::mux::event::SessionEvents;
use crate::mux::handle::Session;
use crate::mux::role::Role;
use crate::proto::error_code::ErrorCode;
use crate::proto::frame::HttpFrame;
use crate::proto::CONNECTION_PREFACE;

/// Create the session handle and spawn the connection task on a transport
/// that may still be connecting. Commands issued before the transport is
/// ready queue in the command channel and are replayed in issue order.
pub(crate) fn start_connect<F, S>(
    connect: F,
    role: Role,
    conf: Config,
    codec: Box<dyn HeaderCodec>,
    authority: Option<String>,
    scheme: String,
) -> (Session, SessionEvents)
where
    F: Future<Output = crate::Result<S>> + Send + 'static,
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (command_tx, command_rx) = unbounded();
    let (events_tx, events_rx) = unbounded();
    let cell = Arc::new(SessionCell::new(conf.max_pending_ack));
    // the initial SETTINGS advertised at bind occupies an ACK slot from
    // the very beginning
    cell.lock().pending_ack = 1;
    let next_key = Arc::new(AtomicU32::new(1));

    let session = Session {
        tx: command_tx.clone(),
        cell: cell.clone(),
        role,
        next_key: next_key.clone(),
        authority,
        scheme,
    };

    tokio::spawn(async move {
        match connect.await {
            Ok(io) => {
                run(
                    io, role, conf, codec, events_tx, command_tx, command_rx, cell, next_key,
                )
                .await;
            }
            Err(error) => {
                // never connected: fail every queued command's session
                {
                    let mut state = cell.lock();
                    state.destroying = false;
                    state.destroyed = true;
                }
                drop(events_tx.unbounded_send(SessionEvent::Error(error)));
                drop(events_tx.unbounded_send(SessionEvent::Closed));
            }
        }
    });

    (session, SessionEvents { rx: events_rx })
}

/// Create the session handle and spawn the connection task on an
/// already-established transport.
pub(crate) fn start<S>(
    io: S,
    role: Role,
    conf: Config,
    codec: Box<dyn HeaderCodec>,
    authority: Option<String>,
    scheme: String,
) -> (Session, SessionEvents)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    start_connect(
        async move { Ok(io) },
        role,
        conf,
        codec,
        authority,
        scheme,
    )
}

#[allow(clippy::too_many_arguments)]
async fn run<S>(
    io: S,
    role: Role,
    conf: Config,
    codec: Box<dyn HeaderCodec>,
    events_tx: UnboundedSender<SessionEvent>,
    command_tx: UnboundedSender<Command>,
    command_rx: UnboundedReceiver<Command>,
    cell: Arc<SessionCell>,
    next_key: Arc<AtomicU32>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, mut write_half) = tokio::io::split(io);

    let mut conn = match Conn::new(
        role,
        conf,
        codec,
        events_tx.clone(),
        command_tx,
        cell.clone(),
        next_key,
    ) {
        Ok(conn) => conn,
        Err(error) => {
            drop(events_tx.unbounded_send(SessionEvent::Error(error)));
            drop(events_tx.unbounded_send(SessionEvent::Closed));
            return;
        }
    };

    // 3.5: the client speaks first, with the connection preface
    let preface = match role {
        Role::Client => write_half.write_all(CONNECTION_PREFACE).await.map_err(Error::from),
        Role::Server => {
            let mut buf = [0u8; 24];
            match read_half.read_exact(&mut buf).await {
                Ok(..) if &buf[..] == CONNECTION_PREFACE => Ok(()),
                Ok(..) => Err(Error::InvalidConnectionPreface),
                Err(e) => Err(Error::from(e)),
            }
        }
    };
    if let Err(error) = preface {
        conn.destroy(Some(error));
        return;
    }

    // the reader task turns transport bytes into whole frames; everything
    // else happens on this task
    let (frames_tx, mut frames_rx) = unbounded::<crate::Result<Option<HttpFrame>>>();
    let reader_cell = cell;
    tokio::spawn(async move {
        let mut framed = FramedRead::new(read_half);
        loop {
            let item = framed.recv_frame(reader_cell.max_frame_size()).await;
            let stop = !matches!(item, Ok(Some(..)));
            if frames_tx.unbounded_send(item).is_err() || stop {
                return;
            }
        }
    });

    conn.on_bind();

    let result = run_loop(&mut conn, &mut write_half, &mut frames_rx, command_rx).await;

    if let Err(error) = &result {
        warn!("connection failed: {}", error);
        conn.terminal_goaway(goaway_code(error));
    }
    drop(flush(&mut conn, &mut write_half).await);
    conn.destroy(result.err());
    drop(write_half.shutdown().await);
}

async fn run_loop<W: AsyncWrite + Unpin>(
    conn: &mut Conn,
    write: &mut W,
    frames_rx: &mut UnboundedReceiver<crate::Result<Option<HttpFrame>>>,
    mut command_rx: UnboundedReceiver<Command>,
) -> crate::Result<()> {
    loop {
        // drain everything flow control permits before blocking; a large
        // response must not wait for unrelated inbound traffic
        loop {
            conn.buffer_outg()?;
            if conn.queued_write.is_empty() {
                break;
            }
            flush(conn, write).await?;
        }

        if conn.should_end() {
            return Ok(());
        }

        let wakeup = conn.next_wakeup();
        tokio::select! {
            item = frames_rx.next() => match item {
                Some(Ok(Some(frame))) => conn.process_frame(frame)?,
                Some(Ok(None)) => {
                    debug!("EOF from peer");
                    return if conn.eof_expected() {
                        Ok(())
                    } else {
                        Err(Error::IoError(io::Error::from(io::ErrorKind::UnexpectedEof)))
                    };
                }
                Some(Err(error)) => return Err(error),
                None => return Ok(()),
            },
            command = command_rx.next() => match command {
                Some(command) => conn.process_command(command)?,
                // every handle is gone; nothing can ever use this session
                None => return Ok(()),
            },
            _ = tokio::time::sleep(wakeup) => conn.on_tick(),
        }
    }
}

async fn flush<W: AsyncWrite + Unpin>(conn: &mut Conn, write: &mut W) -> crate::Result<()> {
    let len = conn.queued_write.queued_bytes_len();
    if len == 0 {
        return Ok(());
    }
    write.write_all_buf(conn.queued_write.buf_mut()).await?;
    conn.note_flushed(len as u64);
    Ok(())
}

/// Error code for the GOAWAY announcing a session-fatal failure.
fn goaway_code(error: &Error) -> ErrorCode {
    match error {
        Error::CodeError(code) => *code,
        Error::WindowSizeOverflow => ErrorCode::FlowControlError,
        Error::PayloadTooLarge(..) => ErrorCode::FrameSizeError,
        Error::ParseFrame(..)
        | Error::GoawayAfterGoaway
        | Error::PingAckMismatch(..)
        | Error::UnexpectedPushPromise
        | Error::ContinuationFrameWithoutHeaders
        | Error::ExpectingContinuationGot(..)
        | Error::ExpectingContinuationGotDifferentStreamId(..) => ErrorCode::ProtocolError,
        Error::IoError(..) => ErrorCode::NoError,
        _ => ErrorCode::InternalError,
    }
}
