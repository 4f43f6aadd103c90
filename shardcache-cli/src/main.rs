//  Copyright 2026 shardcache-rs contributors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! Ad-hoc command-line client and single-node launcher for shardcache,
//! one clap subcommand per operation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use shardcache::prelude::*;
use shardcache_memory::{AdmissionPolicy, Owner};
use shardcache_net::tcp::{TcpDialer, TcpPeerProtocol};
use shardcache_net::Dial;

#[derive(Parser)]
#[command(name = "shardcache", about = "a distributed, sharded, in-memory cache", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ClientArgs {
    /// Peer topology this client dispatches against, `label@host:port`
    /// entries separated by `;`.
    #[arg(long, value_delimiter = ';', required = true)]
    nodes: Vec<String>,

    /// Shared secret used to sign/verify wire frames, if the cluster runs
    /// with one configured.
    #[arg(long)]
    auth: Option<String>,

    /// Pin node selection to a uniformly random node, retried on failure,
    /// instead of consistent-hash routing by key.
    #[arg(long)]
    random_node: bool,

    #[arg(long, default_value_t = 500)]
    tcp_timeout_ms: u64,
}

impl ClientArgs {
    fn build(&self) -> Result<Arc<Client>> {
        let nodes = parse_nodes(&self.nodes)?;
        let client = Client::create(nodes, self.auth.as_ref().map(|s| s.clone().into_bytes()));
        client.tcp_timeout(Duration::from_millis(self.tcp_timeout_ms));
        client.use_random_node(self.random_node);
        Ok(client)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Runs a single node: a peer-facing TCP listener over an in-process
    /// `Cache`.
    Serve {
        /// This node's own label on the consistent-hash ring.
        #[arg(long)]
        label: String,

        #[arg(long)]
        listen: SocketAddr,

        /// Full cluster topology (including this node), `label@host:port`
        /// entries separated by `;`. Leave empty to run as a single,
        /// always-local node.
        #[arg(long, value_delimiter = ';')]
        peers: Vec<String>,

        #[arg(long)]
        auth: Option<String>,

        #[arg(long, default_value_t = 1024)]
        capacity_per_shard: usize,

        #[arg(long, default_value_t = 16)]
        shards: usize,

        #[arg(long, default_value_t = 0)]
        expire_secs: u32,

        #[arg(long)]
        force_caching: bool,

        #[arg(long)]
        global_storage: bool,
    },

    Get {
        #[command(flatten)]
        client: ClientArgs,
        key: String,
    },

    Set {
        #[command(flatten)]
        client: ClientArgs,
        key: String,
        value: String,
        #[arg(long, default_value_t = 0)]
        expire_secs: u32,
    },

    Add {
        #[command(flatten)]
        client: ClientArgs,
        key: String,
        value: String,
        #[arg(long, default_value_t = 0)]
        expire_secs: u32,
    },

    Del {
        #[command(flatten)]
        client: ClientArgs,
        key: String,
    },

    Evict {
        #[command(flatten)]
        client: ClientArgs,
        key: String,
    },

    Exists {
        #[command(flatten)]
        client: ClientArgs,
        key: String,
    },

    Touch {
        #[command(flatten)]
        client: ClientArgs,
        key: String,
        expire_secs: u32,
    },

    Offset {
        #[command(flatten)]
        client: ClientArgs,
        key: String,
        offset: u32,
        len: u32,
    },

    Stats {
        #[command(flatten)]
        client: ClientArgs,
        node_label: String,
    },

    Check {
        #[command(flatten)]
        client: ClientArgs,
        node_label: String,
    },

    Index {
        #[command(flatten)]
        client: ClientArgs,
        node_label: String,
    },

    MigrationBegin {
        #[command(flatten)]
        client: ClientArgs,
        #[arg(long, value_delimiter = ';', required = true)]
        to: Vec<String>,
    },

    MigrationAbort {
        #[command(flatten)]
        client: ClientArgs,
    },
}

fn parse_node(entry: &str) -> Result<Node> {
    let (label, addr) = entry
        .split_once('@')
        .with_context(|| format!("malformed node entry {entry:?}, expected label@host:port"))?;
    let address: SocketAddr = addr
        .parse()
        .with_context(|| format!("bad address in node entry {entry:?}"))?;
    Ok(Node {
        label: label.to_string(),
        address,
    })
}

fn parse_nodes(specs: &[String]) -> Result<Vec<Node>> {
    specs.iter().map(|s| parse_node(s)).collect()
}

fn print_bytes(label: &str, data: &[u8]) {
    match std::str::from_utf8(data) {
        Ok(s) => println!("{label}: {s}"),
        Err(_) => println!("{label} ({} bytes): {data:02x?}", data.len()),
    }
}

/// Dials one peer. `SyncPeerFetchDriver` builds a fresh `CliPeerDialer`
/// per owner label (see its `dialer_factory`), so each remote peer gets
/// its own connection pool rather than sharing one fixed address.
struct CliPeerDialer {
    addr: SocketAddr,
    timeout: Duration,
    secret: Option<Vec<u8>>,
}

#[async_trait]
impl Dial<TcpPeerProtocol> for CliPeerDialer {
    async fn dial(&self) -> shardcache_common::Result<TcpPeerProtocol> {
        let stream = TcpDialer {
            addr: self.addr,
            timeout: self.timeout,
        }
        .dial()
        .await?;
        Ok(TcpPeerProtocol::new(stream, self.secret.clone()))
    }
}

async fn run_serve(
    label: String,
    listen: SocketAddr,
    peers: Vec<String>,
    auth: Option<String>,
    capacity_per_shard: usize,
    shards: usize,
    expire_secs: u32,
    force_caching: bool,
    global_storage: bool,
) -> Result<()> {
    let secret = auth.map(|s| s.into_bytes());
    let peer_nodes = parse_nodes(&peers)?;

    let router = RingRouter::new(label.clone(), peer_nodes, global_storage);

    let tcp_timeout = Duration::from_millis(500);
    let dial_secret = secret.clone();
    let driver = Arc::new(SyncPeerFetchDriver::new(
        move |owner: &Owner| CliPeerDialer {
            addr: owner.address,
            timeout: tcp_timeout,
            secret: dial_secret.clone(),
        },
        8,
        AdmissionPolicy::new(force_caching),
        secret.clone(),
    ));

    let config = Config {
        expire_time_secs: expire_secs,
        force_caching,
        ..Config::default()
    };

    let dyn_router: Arc<dyn shardcache_memory::Router> = router.clone();
    let cache = CacheBuilder::new(dyn_router, driver)
        .config(config)
        .capacity(capacity_per_shard, shards)
        .build();

    let server = PeerServer::new(cache, router, secret);
    tracing::info!(%listen, %label, "starting shardcache node");
    server.serve(listen).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            label,
            listen,
            peers,
            auth,
            capacity_per_shard,
            shards,
            expire_secs,
            force_caching,
            global_storage,
        } => {
            run_serve(
                label,
                listen,
                peers,
                auth,
                capacity_per_shard,
                shards,
                expire_secs,
                force_caching,
                global_storage,
            )
            .await?;
        }
        Command::Get { client, key } => {
            let client = client.build()?;
            match client.get(key.as_bytes()).await? {
                Some(data) => print_bytes(&key, &data),
                None => println!("{key}: (not found)"),
            }
        }
        Command::Set { client, key, value, expire_secs } => {
            let client = client.build()?;
            client.set(key.as_bytes(), value.as_bytes(), expire_secs).await?;
            println!("OK");
        }
        Command::Add { client, key, value, expire_secs } => {
            let client = client.build()?;
            let added = client.add(key.as_bytes(), value.as_bytes(), expire_secs).await?;
            println!("{}", if added { "OK" } else { "EXISTS" });
        }
        Command::Del { client, key } => {
            let client = client.build()?;
            client.del(key.as_bytes()).await?;
            println!("OK");
        }
        Command::Evict { client, key } => {
            let client = client.build()?;
            client.evict(key.as_bytes()).await?;
            println!("OK");
        }
        Command::Exists { client, key } => {
            let client = client.build()?;
            println!("{}", client.exists(key.as_bytes()).await?);
        }
        Command::Touch { client, key, expire_secs } => {
            let client = client.build()?;
            client.touch(key.as_bytes(), expire_secs).await?;
            println!("OK");
        }
        Command::Offset { client, key, offset, len } => {
            let client = client.build()?;
            let data = client.offset(key.as_bytes(), offset, len).await?;
            print_bytes(&key, &data);
        }
        Command::Stats { client, node_label } => {
            let client = client.build()?;
            let data = client.stats(&node_label).await?;
            print_bytes(&node_label, &data);
        }
        Command::Check { client, node_label } => {
            let client = client.build()?;
            println!("{}", client.check(&node_label).await?);
        }
        Command::Index { client, node_label } => {
            let client = client.build()?;
            let data = client.index(&node_label).await?;
            print_bytes(&node_label, &data);
        }
        Command::MigrationBegin { client, to } => {
            let client = client.build()?;
            let nodes = parse_nodes(&to)?;
            if nodes.is_empty() {
                bail!("migration-begin requires at least one --to entry");
            }
            client.migration_begin(nodes).await?;
            println!("OK");
        }
        Command::MigrationAbort { client } => {
            let client = client.build()?;
            client.migration_abort().await?;
            println!("OK");
        }
    }

    Ok(())
}
