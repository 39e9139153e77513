//! A stream endpoint whose underlying socket can be hot-swapped
//!
//! The multiplexer above reads and writes this as one long-lived
//! connection. Each operation resolves the currently bound socket
//! when it starts and stays on that specific socket until it returns,
//! even if a swap happens mid-operation; only the next operation sees
//! the new socket. A swap therefore never redirects in-flight I/O.
//!
//! The displaced socket stays alive until its [`Retired`] handle is
//! dropped. An operation whose socket is closed out from under it
//! (disposal, or end-of-stream on a socket that is no longer current)
//! treats that as transient and restarts on the current binding, so
//! the multiplexer never observes the exchange. The lock guards only
//! pointer updates and is never held across a suspension point.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

struct State<S> {
    /// Currently bound socket, tagged with its generation
    current: Option<(u64, S)>,
    /// Displaced socket kept alive for operations still pinned to it;
    /// dropped when its `Retired` handle is disposed
    retired: Option<(u64, S)>,
    next_generation: u64,
    /// Generation the in-flight read operation resolved at its start
    read_pin: Option<u64>,
    write_pin: Option<u64>,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
    closed: bool,
}

impl<S> State<S> {
    fn current_generation(&self) -> Option<u64> {
        self.current.as_ref().map(|(generation, _)| *generation)
    }

    fn wake_all(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
        if let Some(waker) = self.write_waker.take() {
            waker.wake();
        }
    }
}

fn lock<S>(state: &Mutex<State<S>>) -> MutexGuard<'_, State<S>> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Disposal handle for a swapped-out socket.
///
/// The caller that triggered the swap owns this handle; dropping it
/// closes the displaced socket and lets any operation still pinned to
/// it restart on the current binding.
pub struct Retired<S> {
    state: Arc<Mutex<State<S>>>,
    generation: u64,
}

impl<S> Drop for Retired<S> {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if let Some((generation, _)) = &state.retired {
            if *generation == self.generation {
                state.retired = None;
                state.wake_all();
            }
        }
    }
}

/// Cloneable handle to a swappable stream. Clones share the same
/// binding; exactly one reader and one writer (the multiplexer) are
/// expected to perform I/O at a time.
pub struct VirtualConn<S> {
    state: Arc<Mutex<State<S>>>,
}

impl<S> Clone for VirtualConn<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<S> VirtualConn<S> {
    /// New virtual connection bound to `conn`
    pub fn new(conn: S) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                current: Some((0, conn)),
                retired: None,
                next_generation: 1,
                read_pin: None,
                write_pin: None,
                read_waker: None,
                write_waker: None,
                closed: false,
            })),
        }
    }

    /// Rebind to `new_conn`. The displaced socket is not closed here:
    /// it lives until the returned [`Retired`] handle is dropped, so
    /// an in-flight operation keeps running against it. Operations
    /// started after the swap use the new socket.
    ///
    /// Swapping a closed transport disposes the new socket and
    /// returns `None`.
    pub fn swap(&self, new_conn: S) -> Option<Retired<S>> {
        let mut state = lock(&self.state);
        if state.closed {
            return None;
        }

        // only one displaced socket is kept; an earlier one that was
        // never disposed is dropped now
        if state.retired.take().is_some() {
            state.wake_all();
        }

        let generation = state.next_generation;
        state.next_generation += 1;

        match state.current.replace((generation, new_conn)) {
            Some(old) => {
                let old_generation = old.0;
                state.retired = Some(old);
                Some(Retired {
                    state: Arc::clone(&self.state),
                    generation: old_generation,
                })
            }
            None => None,
        }
    }

    /// Drop the bound socket (closing it) and refuse further I/O
    pub fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.current = None;
        state.read_pin = None;
        state.write_pin = None;
        state.wake_all();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn closed_err() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, "virtual transport closed")
    }
}

impl VirtualConn<TcpStream> {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &lock(&self.state).current {
            Some((_, conn)) => conn.local_addr(),
            None => Err(Self::closed_err()),
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match &lock(&self.state).current {
            Some((_, conn)) => conn.peer_addr(),
            None => Err(Self::closed_err()),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for VirtualConn<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = lock(&self.state);
        loop {
            if state.closed {
                state.read_pin = None;
                return Poll::Ready(Err(Self::closed_err()));
            }

            // an operation resolves its socket once and keeps it
            let target = match state.read_pin {
                Some(generation) => generation,
                None => match state.current_generation() {
                    Some(generation) => {
                        state.read_pin = Some(generation);
                        generation
                    }
                    None => return Poll::Ready(Err(Self::closed_err())),
                },
            };

            let is_current = state.current_generation() == Some(target);
            let sock = if is_current {
                state.current.as_mut().map(|(_, sock)| sock)
            } else {
                match &mut state.retired {
                    Some((generation, sock)) if *generation == target => Some(sock),
                    _ => None,
                }
            };
            let Some(sock) = sock else {
                // the pinned socket was disposed out from under the
                // operation; restart on the current binding
                state.read_pin = None;
                continue;
            };

            let before = buf.filled().len();
            match Pin::new(sock).poll_read(cx, buf) {
                Poll::Pending => {
                    state.read_waker = Some(cx.waker().clone());
                    return Poll::Pending;
                }
                Poll::Ready(Ok(())) => {
                    let got_data = buf.filled().len() > before;
                    if got_data || is_current {
                        state.read_pin = None;
                        return Poll::Ready(Ok(()));
                    }
                    // end-of-stream on a displaced socket ends only
                    // that socket; the operation restarts on the
                    // current binding
                    state.read_pin = None;
                    continue;
                }
                Poll::Ready(Err(err)) => {
                    state.read_pin = None;
                    if is_current {
                        return Poll::Ready(Err(err));
                    }
                    continue;
                }
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for VirtualConn<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = lock(&self.state);
        loop {
            if state.closed {
                state.write_pin = None;
                return Poll::Ready(Err(Self::closed_err()));
            }

            let target = match state.write_pin {
                Some(generation) => generation,
                None => match state.current_generation() {
                    Some(generation) => {
                        state.write_pin = Some(generation);
                        generation
                    }
                    None => return Poll::Ready(Err(Self::closed_err())),
                },
            };

            let is_current = state.current_generation() == Some(target);
            let sock = if is_current {
                state.current.as_mut().map(|(_, sock)| sock)
            } else {
                match &mut state.retired {
                    Some((generation, sock)) if *generation == target => Some(sock),
                    _ => None,
                }
            };
            let Some(sock) = sock else {
                state.write_pin = None;
                continue;
            };

            match Pin::new(sock).poll_write(cx, buf) {
                Poll::Pending => {
                    state.write_waker = Some(cx.waker().clone());
                    return Poll::Pending;
                }
                Poll::Ready(Ok(0)) if !is_current && !buf.is_empty() => {
                    // displaced socket no longer accepts bytes
                    state.write_pin = None;
                    continue;
                }
                Poll::Ready(Ok(n)) => {
                    state.write_pin = None;
                    return Poll::Ready(Ok(n));
                }
                Poll::Ready(Err(err)) => {
                    state.write_pin = None;
                    if is_current {
                        return Poll::Ready(Err(err));
                    }
                    continue;
                }
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut state = lock(&self.state);
        loop {
            if state.closed {
                state.write_pin = None;
                return Poll::Ready(Err(Self::closed_err()));
            }

            let target = match state.write_pin {
                Some(generation) => generation,
                None => match state.current_generation() {
                    Some(generation) => generation,
                    None => return Poll::Ready(Err(Self::closed_err())),
                },
            };

            let is_current = state.current_generation() == Some(target);
            let sock = if is_current {
                state.current.as_mut().map(|(_, sock)| sock)
            } else {
                match &mut state.retired {
                    Some((generation, sock)) if *generation == target => Some(sock),
                    _ => None,
                }
            };
            let Some(sock) = sock else {
                state.write_pin = None;
                continue;
            };

            match Pin::new(sock).poll_flush(cx) {
                Poll::Pending => {
                    state.write_waker = Some(cx.waker().clone());
                    return Poll::Pending;
                }
                Poll::Ready(Ok(())) => {
                    state.write_pin = None;
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Err(err)) => {
                    state.write_pin = None;
                    if is_current {
                        return Poll::Ready(Err(err));
                    }
                    continue;
                }
            }
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut state = lock(&self.state);
        let Some((_, sock)) = state.current.as_mut() else {
            // already closed
            return Poll::Ready(Ok(()));
        };
        match Pin::new(sock).poll_shutdown(cx) {
            Poll::Ready(res) => {
                state.closed = true;
                state.current = None;
                state.read_pin = None;
                state.write_pin = None;
                state.wake_all();
                Poll::Ready(res)
            }
            Poll::Pending => {
                state.write_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
