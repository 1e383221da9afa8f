// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

pub use clap::Parser;
use net::hip::Hit;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// A mobile router client given on the command line, as `HIT=ADDRESS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientArg {
    pub hit: Hit,
    pub addr: IpAddr,
}
impl FromStr for ClientArg {
    type Err = String;
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let Some((hit, addr)) = input.split_once('=') else {
            return Err(format!("Expected HIT=ADDRESS, got '{input}'"));
        };
        let hit = Ipv6Addr::from_str(hit)
            .map(Hit::from)
            .map_err(|e| format!("Bad HIT '{hit}': {e}"))?;
        let addr = IpAddr::from_str(addr).map_err(|e| format!("Bad address '{addr}': {e}"))?;
        Ok(ClientArg { hit, addr })
    }
}

#[derive(Parser, Debug)]
#[command(name = "HIP mobile router")]
#[command(version = "0.1")]
#[command(about = "Address mobility and SPINAT gateway for HIP hosts", long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct CmdArgs {
    #[arg(long, help = "Run as mobile router for the clients given with --client")]
    mobile_router: bool,

    #[arg(
        long,
        value_name = "interface name",
        help = "Interface facing the peers. Its preferred address is the router's external address"
    )]
    external_iface: Option<String>,

    #[arg(
        long,
        value_name = "IP address",
        help = "Address to prefer over any other when present"
    )]
    preferred_address: Option<IpAddr>,

    #[arg(
        long,
        value_name = "interface name",
        help = "Interface whose IPv4 address is preferred"
    )]
    preferred_iface: Option<String>,

    #[arg(
        long,
        value_name = "client",
        value_parser = ClientArg::from_str,
        value_delimiter = ',',
        help = "Mobile router client as HIT=ADDRESS. Several clients can be given, comma-separated.
E.g. --client 2001:10::c=192.168.0.2,2001:10::d=192.168.0.3"
    )]
    client: Vec<ClientArg>,

    #[arg(
        long,
        value_name = "path",
        default_value = "/var/run/hipmr/feed.sock",
        help = "Unix socket the mobile router receives intercepted packets, registrations and tickets on"
    )]
    feed_socket: PathBuf,

    #[arg(long, help = "Classify the NAT in front of the host when addresses are added")]
    nat_detection: bool,

    #[arg(
        long,
        value_name = "IP:PORT",
        help = "Server used for NAT classification"
    )]
    stun_server: Option<SocketAddr>,

    #[arg(
        long,
        value_name = "ms",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(10..),
        help = "Period of the interface rescans, in milliseconds"
    )]
    poll_period: u64,

    #[arg(
        long,
        value_name = "ms",
        default_value_t = 500,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Longest wait of the mobile router for a packet before it checks for a new external address, in milliseconds"
    )]
    dispatch_timeout: u64,

    #[arg(
        long,
        value_name = "N",
        default_value_t = 64,
        value_parser = clap::value_parser!(u32).range(1..=4096),
        help = "Random draws before giving up on finding a free public SPI"
    )]
    spi_retry_cap: u32,

    #[arg(
        long,
        value_name = "seconds",
        default_value_t = 3600,
        help = "Lifetime of the locators announced in proxy UPDATEs"
    )]
    locator_lifetime: u32,

    #[arg(
        long,
        default_value_t = false,
        help = "Show the available tracing tags and exit"
    )]
    show_tracing_tags: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Show configurable tracing targets and exit"
    )]
    show_tracing_targets: bool,

    #[arg(
        long,
        value_name = "tracing configuration",
        help = "Tracing config string as comma-separated sequence of tag=level, with level one in [off,error,warn,info,debug,trace].
Passing default=level sets the default log-level.
Passing all=level allows setting the log-level of all targets to level.
E.g. default=error,all=info,spinat=debug will set the default target to error, and all the registered targets to info, but enable debug for spinat"
    )]
    tracing: Option<String>,
}

impl CmdArgs {
    pub fn mobile_router(&self) -> bool {
        self.mobile_router
    }
    pub fn external_iface(&self) -> Option<&str> {
        self.external_iface.as_deref()
    }
    pub fn preferred_address(&self) -> Option<IpAddr> {
        self.preferred_address
    }
    pub fn preferred_iface(&self) -> Option<&str> {
        self.preferred_iface.as_deref()
    }

    // clients of the mobile router, known up front
    pub fn clients(&self) -> impl Iterator<Item = &ClientArg> {
        self.client.iter().inspect(|c| debug!("Client {}={}", c.hit, c.addr))
    }

    pub fn feed_socket(&self) -> &Path {
        &self.feed_socket
    }

    pub fn nat_detection(&self) -> bool {
        self.nat_detection
    }
    pub fn stun_server(&self) -> Option<SocketAddr> {
        self.stun_server
    }
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period)
    }
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout)
    }
    pub fn spi_retry_cap(&self) -> usize {
        self.spi_retry_cap as usize
    }
    pub fn locator_lifetime(&self) -> u32 {
        self.locator_lifetime
    }

    pub fn show_tracing_tags(&self) -> bool {
        self.show_tracing_tags
    }
    pub fn show_tracing_targets(&self) -> bool {
        self.show_tracing_targets
    }
    pub fn tracing(&self) -> Option<&String> {
        self.tracing.as_ref()
    }
}
