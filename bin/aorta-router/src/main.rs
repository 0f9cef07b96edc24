//! `aorta-router`: accepts inbound AMQP 1.0 connections, routes each
//! delivered message to zero or more destinations per a YAML/JSON rule
//! file, and forwards routed messages on to upstream peers through the
//! same durable spool the publisher uses.
//!
//! Receiver links (downstream producers attaching to send us messages)
//! are granted credit and consumed. Any attempt to attach a *sender*
//! link against this router — i.e. a peer trying to consume directly
//! from us rather than go through an upstream — is rejected by closing
//! the link immediately; only the configured upstreams receive routed
//! traffic.

use anyhow::{Context, Result};
use aorta_buffer::{Buffer, SpooledBuffer};
use aorta_common::clock::{Clock, SystemClock};
use aorta_common::message::Message as AortaMessage;
use aorta_publisher::{
    flush, pick_random, spawn_beat, OrchestratorConfig, OutboundLink, PublisherStateMachine, ShutdownHandle,
};
use aorta_router::{load_rules, RuleSet};
use clap::Parser;
use fe2o3_amqp::acceptor::{
    ConnectionAcceptor, LinkAcceptor, LinkEndpoint, ListenerConnectionHandle, ListenerSessionHandle, SessionAcceptor,
};
use fe2o3_amqp::{Connection, Sender, Session};
use fe2o3_amqp_types::messaging::{Body, Data, Outcome};
use fe2o3_amqp_types::primitives::{Binary, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// AMQP 1.0 store-and-forward message router.
#[derive(Parser, Debug)]
#[command(name = "aorta-router")]
struct Args {
    /// Local address to accept inbound connections on.
    #[arg(long, default_value = "0.0.0.0:5672")]
    bind: String,

    /// Upstream peer to forward routed messages to, as an AMQP URL. May
    /// be repeated; destinations named in the rule file must match an
    /// upstream's label (`host:port`) to actually be reachable.
    #[arg(short = 'U', long = "upstream", required = true)]
    upstreams: Vec<String>,

    /// Spool directory. Falls back to AORTA_SPOOL_DIR, then /var/spool/aorta.
    #[arg(long, env = "AORTA_SPOOL_DIR", default_value = "/var/spool/aorta")]
    spool: PathBuf,

    /// Path to a YAML/JSON routing rule file, or a glob matching several.
    /// May be repeated; rules from every matched file are concatenated.
    #[arg(long = "routes", required = true)]
    routes: Vec<String>,

    /// Source label recorded in delivery records, for operator visibility.
    #[arg(long = "ingress-channel", default_value = "ingress")]
    ingress_channel: String,

    /// Log level passed through as the default RUST_LOG if unset.
    #[arg(long, default_value = "info")]
    loglevel: String,
}

const INBOUND_CREDIT: u32 = 1000;

struct AmqpSenderLink {
    sender: Sender,
}

#[async_trait::async_trait]
impl OutboundLink for AmqpSenderLink {
    async fn send(&mut self, body: Vec<u8>) -> std::result::Result<Outcome, String> {
        let data = Data(Binary::from(body));
        self.sender.send(data).await.map_err(|e| e.to_string())
    }
}

/// One configured upstream's connection state, shared across beats and
/// flush-on-enqueue triggers.
struct Upstream {
    link: Mutex<AmqpSenderLink>,
    host: String,
    port: u16,
    label: String,
}

/// The router's view of its outbound side: every configured upstream,
/// plus what `flush_one` needs to drain the spool into one of them.
struct OutboundPool {
    upstreams: Vec<Arc<Upstream>>,
    buffer: Arc<dyn Buffer>,
    state_machine: Arc<PublisherStateMachine>,
    clock: Arc<dyn Clock>,
    ingress_channel: String,
    flush_limit: usize,
}

impl OutboundPool {
    /// Flushes one randomly chosen upstream's due messages. Called both
    /// from the beat task and, immediately, after a message is routed so
    /// forwarding doesn't wait for the next tick.
    async fn flush_one(&self) {
        let Some(upstream) = pick_random(&self.upstreams) else {
            return;
        };
        let mut link = upstream.link.lock().await;
        match flush(
            &mut *link,
            &self.buffer,
            &self.state_machine,
            self.clock.as_ref(),
            &upstream.host,
            upstream.port,
            &self.ingress_channel,
            &upstream.label,
            &upstream.label,
            self.flush_limit,
        )
        .await
        {
            Ok(0) => {}
            Ok(n) => info!(upstream = %upstream.label, sent = n, "flushed routed messages"),
            Err(e) => error!(upstream = %upstream.label, error = %e, "flush to upstream failed"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", &args.loglevel);
    }
    aorta_common::logging::init_logging("aorta-router");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let buffer: Arc<dyn Buffer> = Arc::new(
        SpooledBuffer::open(&args.spool, clock.clone())
            .with_context(|| format!("opening spool at {}", args.spool.display()))?,
    );

    let route_files = expand_route_patterns(&args.routes)?;
    let mut loaded_rules = Vec::new();
    for path in &route_files {
        loaded_rules.extend(load_rules(path).with_context(|| format!("loading rules from {}", path.display()))?);
    }
    let rules = Arc::new(RuleSet::new(loaded_rules));

    let state_machine = Arc::new(PublisherStateMachine::new(buffer.clone()));
    let config = OrchestratorConfig::default();
    let (shutdown, _rx) = ShutdownHandle::new();

    let mut upstreams = Vec::new();
    for upstream in &args.upstreams {
        let (host, port) = split_host_port(upstream)?;
        let mut connection = Connection::open(&format!("aorta-router-{upstream}"), upstream.as_str())
            .await
            .with_context(|| format!("opening AMQP connection to upstream {upstream}"))?;
        let mut session = Session::begin(&mut connection)
            .await
            .with_context(|| format!("beginning AMQP session with upstream {upstream}"))?;
        let sender = Sender::attach(&mut session, format!("aorta-router-{upstream}"), upstream.clone())
            .await
            .with_context(|| format!("attaching sender link to upstream {upstream}"))?;

        upstreams.push(Arc::new(Upstream {
            link: Mutex::new(AmqpSenderLink { sender }),
            host,
            port,
            label: upstream.clone(),
        }));
    }

    let pool = Arc::new(OutboundPool {
        upstreams,
        buffer: buffer.clone(),
        state_machine,
        clock: clock.clone(),
        ingress_channel: args.ingress_channel.clone(),
        flush_limit: config.flush_limit,
    });

    let beat_pool = pool.clone();
    let beat_task = spawn_beat(config.beat_interval, shutdown.subscribe(), move || {
        let pool = beat_pool.clone();
        async move { pool.flush_one().await }
    });

    let listener = TcpListener::bind(&args.bind).await.with_context(|| format!("binding {}", args.bind))?;
    info!(bind = %args.bind, "router listening for inbound connections");
    let acceptor = Arc::new(ConnectionAcceptor::new("aorta-router"));
    let mut shutdown_rx = shutdown.subscribe();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => { warn!(error = %e, "failed to accept inbound TCP connection"); continue; }
                };
                info!(%peer, "accepted inbound connection");
                let acceptor = acceptor.clone();
                let rules = rules.clone();
                let buffer = buffer.clone();
                let clock = clock.clone();
                let pool = pool.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(acceptor, stream, rules, buffer, clock, pool).await {
                        warn!(%peer, error = %e, "inbound connection ended with an error");
                    }
                });
            }
            _ = shutdown_rx.recv() => {
                info!("shutdown signal received, no longer accepting connections");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received");
                shutdown.shutdown();
                break;
            }
        }
    }

    let _ = beat_task.await;
    Ok(())
}

/// Expands each `--routes` argument as a glob pattern (a bare file path is
/// a pattern that matches only itself) and concatenates the results,
/// de-duplicating in first-seen order.
fn expand_route_patterns(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for pattern in patterns {
        let mut matched_any = false;
        for entry in glob::glob(pattern).with_context(|| format!("invalid routes glob pattern {pattern}"))? {
            let path = entry.with_context(|| format!("reading glob match for pattern {pattern}"))?;
            matched_any = true;
            if seen.insert(path.clone()) {
                out.push(path);
            }
        }
        if !matched_any {
            // Not a glob, or a glob that matched nothing: fall back to
            // treating it as a literal path so a plain --routes FILE
            // still produces a clear "no such file" error downstream.
            let path = PathBuf::from(pattern);
            if seen.insert(path.clone()) {
                out.push(path);
            }
        }
    }
    Ok(out)
}

async fn handle_connection(
    acceptor: Arc<ConnectionAcceptor<(), ()>>,
    stream: tokio::net::TcpStream,
    rules: Arc<RuleSet>,
    buffer: Arc<dyn Buffer>,
    clock: Arc<dyn Clock>,
    pool: Arc<OutboundPool>,
) -> Result<()> {
    let mut connection: ListenerConnectionHandle = acceptor
        .accept(stream)
        .await
        .context("accepting inbound AMQP connection")?;

    while let Some(incoming_session) = connection.next_incoming_session().await {
        let session_acceptor = SessionAcceptor::new();
        let mut session = session_acceptor
            .accept_incoming_session(incoming_session, &mut connection)
            .await
            .context("accepting inbound AMQP session")?;
        let rules = rules.clone();
        let buffer = buffer.clone();
        let clock = clock.clone();
        let pool = pool.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_session(&mut session, rules, buffer, clock, pool).await {
                warn!(error = %e, "session handling ended with an error");
            }
        });
    }
    Ok(())
}

async fn handle_session(
    session: &mut ListenerSessionHandle,
    rules: Arc<RuleSet>,
    buffer: Arc<dyn Buffer>,
    clock: Arc<dyn Clock>,
    pool: Arc<OutboundPool>,
) -> Result<()> {
    let link_acceptor = LinkAcceptor::new();
    loop {
        match link_acceptor.accept(session).await {
            Ok(LinkEndpoint::Receiver(mut receiver)) => {
                receiver
                    .set_credit(INBOUND_CREDIT)
                    .await
                    .context("granting credit to inbound receiver link")?;
                let rules = rules.clone();
                let buffer = buffer.clone();
                let clock = clock.clone();
                let pool = pool.clone();
                tokio::spawn(async move {
                    handle_receiver(receiver, rules, buffer, clock, pool).await;
                });
            }
            Ok(LinkEndpoint::Sender(sender)) => {
                // Only upstreams configured on the CLI may pull messages
                // from this process; a peer attaching as a sender link is
                // asking to consume directly from the router, which we
                // never allow. Close it immediately rather than leaving
                // it half-open.
                warn!("rejecting inbound sender-link-open attempt, closing link");
                let _ = sender.close().await;
            }
            Err(e) => {
                info!(error = %e, "link acceptor returned, session ending");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_receiver(
    mut receiver: fe2o3_amqp::Receiver,
    rules: Arc<RuleSet>,
    buffer: Arc<dyn Buffer>,
    clock: Arc<dyn Clock>,
    pool: Arc<OutboundPool>,
) {
    loop {
        let delivery = match receiver.recv::<Value>().await {
            Ok(d) => d,
            Err(e) => {
                info!(error = %e, "receiver link closed");
                break;
            }
        };

        let bytes = match delivery.body() {
            Body::Data(data) => data.0.to_vec(),
            _ => {
                warn!("received a non-Data body section, rejecting");
                let _ = receiver.reject(&delivery, None).await;
                continue;
            }
        };

        match serde_amqp::from_slice::<AortaMessage>(&bytes) {
            Ok(message) => {
                let destinations = rules.route(&message);
                if destinations.is_empty() {
                    warn!(id = %message.id, "message matched no routing rule, dropping");
                } else {
                    let mut routed_any = false;
                    for dest in destinations {
                        let mut routed = message.clone();
                        routed.address = Some(dest);
                        match buffer.enqueue(routed, clock.now_unix()).await {
                            Ok(()) => routed_any = true,
                            Err(e) => error!(error = %e, "failed to enqueue routed message"),
                        }
                    }
                    if routed_any {
                        // Flush promptly rather than waiting for the next
                        // beat tick; spawned so the receiver isn't blocked
                        // on outbound network I/O.
                        let pool = pool.clone();
                        tokio::spawn(async move { pool.flush_one().await });
                    }
                }
                let _ = receiver.accept(&delivery).await;
            }
            Err(e) => {
                warn!(error = %e, "failed to decode inbound message, rejecting");
                let _ = receiver.reject(&delivery, None).await;
            }
        }
    }
}

fn split_host_port(remote: &str) -> Result<(String, u16)> {
    let stripped = remote.trim_start_matches("amqp://").trim_start_matches("amqps://");
    let hostport = match stripped.rsplit_once('@') {
        Some((_, rest)) => rest,
        None => stripped,
    };
    let (host, port) = hostport
        .rsplit_once(':')
        .with_context(|| format!("expected host:port, got {remote}"))?;
    Ok((host.to_string(), port.parse().context("invalid port")?))
}
