use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    time::Duration,
};

use socket2::{Domain, Socket, Type};

/// Number of pending connections the kernel queues on a listener.
const LISTEN_BACKLOG: i32 = 5;

/// Bind and configure a listening socket.
pub fn bind_listener(local_addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(local_addr), Type::STREAM, None)?;

    // Nodes are frequently restarted on the same ports.
    socket.set_reuse_address(true)?;

    socket.bind(&local_addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Connect to a remote listener, optionally giving up after `timeout`.
pub fn connect(remote_addr: SocketAddr, timeout: Option<Duration>) -> io::Result<TcpStream> {
    match timeout {
        Some(timeout) => TcpStream::connect_timeout(&remote_addr, timeout),
        None => TcpStream::connect(remote_addr),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn bind() {
        const PORT: u16 = 42001;

        let listener = bind_listener(SocketAddr::from(([127, 0, 0, 1], PORT)))
            .expect("bind listener errored");
        assert_eq!(
            listener.local_addr().unwrap(),
            SocketAddr::from(([127, 0, 0, 1], PORT))
        );
    }

    #[test]
    fn rebind_after_close() {
        const PORT: u16 = 42002;

        let addr = SocketAddr::from(([127, 0, 0, 1], PORT));
        drop(bind_listener(addr).expect("first bind errored"));
        bind_listener(addr).expect("second bind errored");
    }

    #[test]
    fn connect_to_listener() {
        const PORT: u16 = 42003;

        let addr = SocketAddr::from(([127, 0, 0, 1], PORT));
        let listener = bind_listener(addr).unwrap();

        let mut client = connect(addr, Some(Duration::from_secs(1))).expect("connect errored");
        let (mut server, _) = listener.accept().unwrap();

        client.write_all(b"ping").unwrap();
        let mut buf = [0; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn connect_refused() {
        const PORT: u16 = 42004;

        let addr = SocketAddr::from(([127, 0, 0, 1], PORT));
        assert!(connect(addr, None).is_err());
    }
}
