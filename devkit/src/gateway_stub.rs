/*!
Gateway simulé

Client TCP qui se comporte comme un gateway : émet des rapports
`type,beacon,rssi,payload,gateway` et peut annoncer une adresse via PROXY.
*/

use anyhow::{Context, Result};
use std::net::{IpAddr, SocketAddr};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Construit une ligne de rapport au format gateway
pub fn report_line(beacon: &str, rssi: i32, gateway: &str) -> String {
    format!("$GPRP,{beacon},{rssi},0201061AFF4C00,{gateway}")
}

pub struct GatewayStub {
    stream: TcpStream,
    sent: usize,
}

impl GatewayStub {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect to {addr}"))?;
        log::debug!("gateway stub connected to {}", addr);
        Ok(Self { stream, sent: 0 })
    }

    /// Envoie une ligne brute (le `\n` final est ajouté)
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.flush().await?;
        self.sent += 1;
        Ok(())
    }

    pub async fn send_report(&mut self, beacon: &str, rssi: i32, gateway: &str) -> Result<()> {
        self.send_line(&report_line(beacon, rssi, gateway)).await
    }

    /// En-tête PROXY v1 annonçant `source` comme adresse d'origine
    pub async fn send_proxy(&mut self, source: IpAddr) -> Result<()> {
        let family = if source.is_ipv4() { "TCP4" } else { "TCP6" };
        let dest = if source.is_ipv4() { "0.0.0.0" } else { "::" };
        self.send_line(&format!("PROXY {family} {source} {dest} 40000 7001")).await
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
