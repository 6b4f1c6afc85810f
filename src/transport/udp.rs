use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::anyhow;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::config::CoapConfig;
use crate::transport::{SocketKind, Transport};


/// UDP transport with a unicast socket bound to the configured address and (optionally) a
///  second socket that joins the well-known multicast group. Everything is sent from the unicast
///  socket so that peers reply to our unicast address.
///
/// The sockets are tokio sockets, but they are only used through their non-blocking `try_*`
///  operations, so they must be created inside a tokio runtime.
pub struct UdpTransport {
    unicast_socket: UdpSocket,
    multicast_socket: Option<UdpSocket>,
}

impl UdpTransport {
    pub async fn bind(config: &CoapConfig) -> anyhow::Result<UdpTransport> {
        let unicast_socket = UdpSocket::bind(config.self_addr).await?;
        info!(addr = ?unicast_socket.local_addr()?, "bound unicast socket");

        let multicast_socket = match config.multicast_addr {
            None => None,
            Some(group) => Some(Self::bind_multicast(group)?),
        };

        Ok(UdpTransport {
            unicast_socket,
            multicast_socket,
        })
    }

    fn bind_multicast(group: SocketAddrV4) -> anyhow::Result<UdpSocket> {
        if !group.ip().is_multicast() {
            return Err(anyhow!("{} is not a multicast address", group.ip()));
        }

        // several nodes on the same host listen on the well-known port
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port());
        socket.bind(&bind_addr.into())?;
        socket.join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;

        let socket: std::net::UdpSocket = socket.into();
        info!(?group, "joined multicast group");
        Ok(UdpSocket::from_std(socket)?)
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.unicast_socket.local_addr()?)
    }
}

impl Transport for UdpTransport {
    fn send_datagram(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        match self.unicast_socket.try_send_to(buf, to) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(anyhow!("socket send buffer is full")),
            Err(e) => Err(e.into()),
        }
    }

    fn try_receive_datagram(&self, socket: SocketKind, buf: &mut [u8]) -> anyhow::Result<Option<(usize, SocketAddr)>> {
        let socket = match socket {
            SocketKind::Unicast => &self.unicast_socket,
            SocketKind::Multicast => match &self.multicast_socket {
                Some(s) => s,
                None => return Ok(None),
            },
        };

        match socket.try_recv_from(buf) {
            Ok((len, from)) => {
                debug!(len, ?from, "received datagram");
                Ok(Some((len, from)))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    fn loopback_config() -> CoapConfig {
        let mut config = CoapConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)));
        config.multicast_addr = None;
        config
    }

    #[tokio::test]
    async fn test_send_and_receive_on_loopback() {
        let a = UdpTransport::bind(&loopback_config()).await.unwrap();
        let b = UdpTransport::bind(&loopback_config()).await.unwrap();

        a.send_datagram(b.local_addr().unwrap(), b"hello").unwrap();

        let mut buf = [0u8; 16];
        let mut received = None;
        for _ in 0..100 {
            b.unicast_socket.readable().await.unwrap();
            if let Some(r) = b.try_receive_datagram(SocketKind::Unicast, &mut buf).unwrap() {
                received = Some(r);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let (len, from) = received.expect("datagram was not received");
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_receive_without_data_does_not_block() {
        let transport = UdpTransport::bind(&loopback_config()).await.unwrap();
        let mut buf = [0u8; 16];
        assert!(transport.try_receive_datagram(SocketKind::Unicast, &mut buf).unwrap().is_none());
        assert!(transport.try_receive_datagram(SocketKind::Multicast, &mut buf).unwrap().is_none());
    }

    #[test]
    fn test_non_multicast_group_is_rejected() {
        assert!(UdpTransport::bind_multicast(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5683)).is_err());
    }
}
