//! Command handlers for the netmux CLI
//!
//! Each scenario starts a runtime over a fresh loopback engine, drives two
//! clients through it (client 0 serves, client 1 is the peer) and reports
//! what the multiplexer did.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info};

use netmux_core::{EventKind, NetError, Protocol};
use netmux_harness::LoopbackStack;
use netmux_runtime::{ClientHandle, ConnectionId, Runtime, RuntimeBuilder, RuntimeStats};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Upper bound for any single scenario step
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest read a scenario asks for at once
const READ_CHUNK: usize = 1024;

/// Outcome of one scenario run
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub messages: usize,
    pub bytes_sent: usize,
    pub bytes_echoed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<IpAddr>,
    pub stats: RuntimeStats,
}

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        let json = cli.json;
        let report = match cli.command {
            Commands::TcpEcho {
                port,
                messages,
                size,
            } => Self::tcp_echo(&config, port, messages, size).await?,
            Commands::UdpEcho {
                port,
                messages,
                size,
            } => Self::udp_echo(&config, port, messages, size).await?,
            Commands::Resolve { name } => Self::resolve(&config, &name).await?,
            Commands::ShowConfig => {
                print!("{}", config.to_toml()?);
                return Ok(());
            }
        };
        Self::print_report(&report, json)
    }

    /// Stream `messages` blocks of `size` bytes and read each echo back
    pub async fn tcp_echo(
        config: &AppConfig,
        port: u16,
        messages: usize,
        size: usize,
    ) -> Result<ScenarioReport> {
        if size == 0 || size > config.loopback.receive_window {
            return Err(CliError::Scenario(format!(
                "message size must be within 1..={} (the receive window)",
                config.loopback.receive_window
            )));
        }
        info!("TCP echo: {} message(s) of {} bytes on port {}", messages, size, port);

        let (mut runtime, host) = Self::start(config).await?;
        let server = runtime.client(0)?;
        let peer = runtime.client(1)?;

        let listener = server.open(Protocol::Tcp).await?;
        server.listen(listener, wildcard(port)).await?;

        let conn = peer.open(Protocol::Tcp).await?;
        peer.connect(conn, SocketAddr::new(host, port)).await?;
        let accepted = wait_for(&server, EventKind::Accepted).await?;
        wait_for(&peer, EventKind::NewConnection).await?;
        debug!("Echo connection established ({} <-> {})", conn, accepted);

        let echo = tokio::spawn(tcp_echo_server(server.clone(), listener, accepted));

        let mut bytes_echoed = 0;
        for round in 0..messages {
            let message = pattern(round, size);
            send_all(&peer, conn, &message).await?;
            let echoed = read_exactly(&peer, conn, size).await?;
            if echoed != message {
                return Err(CliError::Scenario(format!("echo of message {} differs", round)));
            }
            bytes_echoed += echoed.len();
        }

        peer.close(conn).await?;
        let echo_total = timeout(STEP_TIMEOUT, echo)
            .await
            .map_err(|_| CliError::Scenario("echo server did not finish".into()))?
            .map_err(|e| CliError::Scenario(format!("echo server failed: {}", e)))??;
        debug!("Echo server forwarded {} bytes", echo_total);

        Self::finish(&mut runtime, "tcp-echo", messages, messages * size, bytes_echoed, None).await
    }

    /// Send `messages` datagrams and read each echo back
    pub async fn udp_echo(
        config: &AppConfig,
        port: u16,
        messages: usize,
        size: usize,
    ) -> Result<ScenarioReport> {
        if size == 0 {
            return Err(CliError::Scenario("datagram size must be non-zero".into()));
        }
        info!("UDP echo: {} datagram(s) of {} bytes on port {}", messages, size, port);

        let (mut runtime, host) = Self::start(config).await?;
        let server = runtime.client(0)?;
        let peer = runtime.client(1)?;

        let socket = server.open(Protocol::Udp).await?;
        server.listen(socket, wildcard(port)).await?;
        let conn = peer.open(Protocol::Udp).await?;
        peer.connect(conn, SocketAddr::new(host, port)).await?;

        let mut bytes_echoed = 0;
        for round in 0..messages {
            let message = pattern(round, size);
            peer.send(conn, &message).await?;

            let at = wait_for(&server, EventKind::RecvFromData).await?;
            let (data, from) = server.recv_from(at, READ_CHUNK.max(size)).await?;
            server.send_to(socket, &data, from).await?;

            // The peer is connected, so its datagrams arrive as plain data
            let at = wait_for(&peer, EventKind::RecvData).await?;
            let echoed = peer.recv(at, READ_CHUNK.max(size)).await?;
            if echoed != message {
                return Err(CliError::Scenario(format!("echo of datagram {} differs", round)));
            }
            bytes_echoed += echoed.len();
        }

        peer.close(conn).await?;
        server.close(socket).await?;

        Self::finish(&mut runtime, "udp-echo", messages, messages * size, bytes_echoed, None).await
    }

    /// Resolve `name` and report the answer
    pub async fn resolve(config: &AppConfig, name: &str) -> Result<ScenarioReport> {
        let (mut runtime, _) = Self::start(config).await?;
        let client = runtime.client(0)?;
        let dns_server = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 53));

        client.request_host_by_name(name, dns_server).await?;
        let event = timeout(STEP_TIMEOUT, async {
            loop {
                let event = client.next_event().await?;
                if event.kind == EventKind::DnsResult {
                    return Ok::<_, NetError>(event);
                }
            }
        })
        .await
        .map_err(|_| CliError::Scenario("no DNS result".into()))??;

        let resolved = match event.dns_status() {
            Some(Ok(())) => client.dns_answer().await?.map(|answer| answer.addr),
            _ => None,
        };
        info!("{} resolved to {:?}", name, resolved);

        Self::finish(&mut runtime, "resolve", 1, 0, 0, resolved).await
    }

    async fn start(config: &AppConfig) -> Result<(Runtime<LoopbackStack>, IpAddr)> {
        let stack = LoopbackStack::new(config.loopback.clone());
        let host = stack.host_addr();
        let runtime = RuntimeBuilder::new(stack)
            .with_config(config.netmux.clone())
            .build_and_start()
            .await?;
        Ok((runtime, host))
    }

    async fn finish(
        runtime: &mut Runtime<LoopbackStack>,
        scenario: &str,
        messages: usize,
        bytes_sent: usize,
        bytes_echoed: usize,
        resolved: Option<IpAddr>,
    ) -> Result<ScenarioReport> {
        let stats = runtime.stats().await?;
        runtime.shutdown().await?;
        Ok(ScenarioReport {
            scenario: scenario.to_string(),
            messages,
            bytes_sent,
            bytes_echoed,
            resolved,
            stats,
        })
    }

    fn print_report(report: &ScenarioReport, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(report)?);
            return Ok(());
        }

        println!("Scenario:              {}", report.scenario);
        println!("Messages:              {}", report.messages);
        println!("Bytes sent:            {}", report.bytes_sent);
        println!("Bytes echoed:          {}", report.bytes_echoed);
        if let Some(addr) = report.resolved {
            println!("Resolved address:      {}", addr);
        }
        let stats = &report.stats;
        println!("Requests handled:      {}", stats.requests_handled);
        println!("Stack callbacks:       {}", stats.dispatch.stack_events);
        println!("Events queued:         {}", stats.dispatch.events_queued);
        println!("Events dropped:        {}", stats.dispatch.events_dropped);
        println!("Segments refused:      {}", stats.dispatch.segments_refused);
        println!("Datagrams dropped:     {}", stats.dispatch.datagrams_dropped);
        println!(
            "Sent notices recovered: {}",
            stats.dispatch.sent_notifications_recovered
        );
        println!(
            "Connections:           {}/{}",
            stats.active_connections, stats.capacity
        );
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Scenario Helpers
// ----------------------------------------------------------------------------

fn wildcard(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

fn pattern(round: usize, size: usize) -> Vec<u8> {
    (0..size).map(|i| ((round + i) % 251) as u8).collect()
}

/// Wait for the next event of `kind`, skipping unrelated ones
async fn wait_for(client: &ClientHandle, kind: EventKind) -> Result<ConnectionId> {
    timeout(STEP_TIMEOUT, async {
        loop {
            let event = client.next_event().await?;
            if event.kind == kind {
                return Ok::<_, NetError>(event.id);
            }
            debug!("{} skipping {:?} on {}", client.id(), event.kind, event.id);
        }
    })
    .await
    .map_err(|_| CliError::Scenario(format!("{} never saw {:?}", client.id(), kind)))?
    .map_err(CliError::from)
}

/// Keep writing until the engine accepted all of `data`
async fn send_all(client: &ClientHandle, id: ConnectionId, data: &[u8]) -> Result<()> {
    let mut sent = 0;
    while sent < data.len() {
        match client.send(id, &data[sent..]).await {
            Ok(n) => sent += n,
            // Window closed: wait for the peer to read and return credit
            Err(NetError::NoMemory) => tokio::time::sleep(Duration::from_millis(5)).await,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Read `len` bytes of stream data, waiting for `RecvData` events as needed
async fn read_exactly(client: &ClientHandle, id: ConnectionId, len: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(len);
    while buffer.len() < len {
        match client.recv(id, len - buffer.len()).await {
            Ok(chunk) => buffer.extend_from_slice(&chunk),
            Err(NetError::Again) => {
                wait_for(client, EventKind::RecvData).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(buffer)
}

/// Echo everything received on `conn` until the peer closes it
async fn tcp_echo_server(
    server: ClientHandle,
    listener: ConnectionId,
    conn: ConnectionId,
) -> Result<usize> {
    let mut total = 0;
    loop {
        let event = server.next_event().await?;
        match event.kind {
            EventKind::RecvData if event.id == conn => loop {
                match server.recv(conn, READ_CHUNK).await {
                    Ok(chunk) => {
                        send_all(&server, conn, &chunk).await?;
                        total += chunk.len();
                    }
                    Err(NetError::Again) => break,
                    Err(e) => return Err(e.into()),
                }
            },
            EventKind::Closed if event.id == conn => {
                server.close(conn).await?;
                server.close(listener).await?;
                return Ok(total);
            }
            EventKind::Aborted | EventKind::TimedOut if event.id == conn => {
                server.close(listener).await?;
                return Err(CliError::Scenario(format!("echo connection failed: {:?}", event.kind)));
            }
            _ => {}
        }
    }
}
