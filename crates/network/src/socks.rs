//! Server side of SOCKS5 (RFC 1928), CONNECT only, no authentication.

use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Result, TrowserError};
use crate::provider::Circuit;

mod socks5 {
    pub const VERSION: u8 = 0x05;
    pub const RESERVED: u8 = 0x00;

    pub mod auth {
        pub const NO_AUTH: u8 = 0x00;
        pub const NO_ACCEPTABLE: u8 = 0xff;
    }

    pub mod cmd {
        pub const CONNECT: u8 = 0x01;
    }

    pub mod addr_type {
        pub const IPV4: u8 = 0x01;
        pub const DOMAIN: u8 = 0x03;
        pub const IPV6: u8 = 0x04;
    }

    pub mod reply {
        pub const SUCCESS: u8 = 0x00;
        pub const CONNECTION_REFUSED: u8 = 0x05;
        pub const COMMAND_NOT_SUPPORTED: u8 = 0x07;
        pub const ADDRESS_NOT_SUPPORTED: u8 = 0x08;
    }
}

/// Destination requested by a SOCKS client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddr {
    pub host: String,
    pub port: u16,
}

/// Runs the greeting and request phases. On success the caller still owes the
/// client a reply, see [`send_reply`].
pub async fn negotiate<S>(stream: &mut S) -> Result<TargetAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = stream.read_u8().await.map_err(io_err)?;
    if version != socks5::VERSION {
        return Err(TrowserError::ProxyServe(format!(
            "Unsupported SOCKS version {}",
            version
        )));
    }

    let nmethods = stream.read_u8().await.map_err(io_err)? as usize;
    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods).await.map_err(io_err)?;

    if !methods.contains(&socks5::auth::NO_AUTH) {
        stream
            .write_all(&[socks5::VERSION, socks5::auth::NO_ACCEPTABLE])
            .await
            .map_err(io_err)?;
        return Err(TrowserError::ProxyServe(
            "Client offered no acceptable auth method".into(),
        ));
    }
    stream
        .write_all(&[socks5::VERSION, socks5::auth::NO_AUTH])
        .await
        .map_err(io_err)?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.map_err(io_err)?;
    let [version, command, _reserved, addr_type] = header;

    if version != socks5::VERSION {
        return Err(TrowserError::ProxyServe(format!(
            "Unsupported SOCKS version {} in request",
            version
        )));
    }
    if command != socks5::cmd::CONNECT {
        send_reply(stream, socks5::reply::COMMAND_NOT_SUPPORTED).await?;
        return Err(TrowserError::ProxyServe(format!(
            "Unsupported SOCKS command {}",
            command
        )));
    }

    let host = match addr_type {
        socks5::addr_type::IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await.map_err(io_err)?;
            Ipv4Addr::from(octets).to_string()
        }
        socks5::addr_type::DOMAIN => {
            let len = stream.read_u8().await.map_err(io_err)? as usize;
            let mut name = vec![0u8; len];
            stream.read_exact(&mut name).await.map_err(io_err)?;
            String::from_utf8(name)
                .map_err(|_| TrowserError::ProxyServe("Domain name is not UTF-8".into()))?
        }
        socks5::addr_type::IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await.map_err(io_err)?;
            Ipv6Addr::from(octets).to_string()
        }
        other => {
            send_reply(stream, socks5::reply::ADDRESS_NOT_SUPPORTED).await?;
            return Err(TrowserError::ProxyServe(format!(
                "Unknown address type {}",
                other
            )));
        }
    };
    let port = stream.read_u16().await.map_err(io_err)?;

    Ok(TargetAddr { host, port })
}

/// Reply with bound address 0.0.0.0:0, which clients ignore for CONNECT.
pub async fn send_reply<S>(stream: &mut S, code: u8) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[
            socks5::VERSION,
            code,
            socks5::RESERVED,
            socks5::addr_type::IPV4,
            0,
            0,
            0,
            0,
            0,
            0,
        ])
        .await
        .map_err(io_err)
}

/// Serve one SOCKS client through `circuit` until either side closes.
pub async fn handle_connection<S, C>(mut stream: S, circuit: &C) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    C: Circuit,
{
    let target = negotiate(&mut stream).await?;
    debug!("SOCKS5 connect request: {}:{}", target.host, target.port);

    let mut remote = match circuit.connect(&target.host, target.port).await {
        Ok(remote) => remote,
        Err(e) => {
            send_reply(&mut stream, socks5::reply::CONNECTION_REFUSED).await?;
            return Err(e);
        }
    };
    send_reply(&mut stream, socks5::reply::SUCCESS).await?;

    let (sent, received) = tokio::io::copy_bidirectional(&mut stream, &mut remote)
        .await
        .map_err(io_err)?;
    debug!(
        "Closed {}:{} ({} bytes out, {} bytes in)",
        target.host, target.port, sent, received
    );
    Ok(())
}

fn io_err(e: std::io::Error) -> TrowserError {
    TrowserError::Io(e.to_string())
}
