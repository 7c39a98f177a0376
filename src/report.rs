//! Final connection details.
//!
//! Public addresses are classified by the family tag the provider reports.
//! Untagged addresses fall back to a dotted-quad pattern match, applied to
//! each address on its own.

use cloudkit::{IpVersion, NetworkAddress, ResourceHandle};
use regex::Regex;
use std::fmt::Write as _;
use std::sync::LazyLock;

/// Administrative user on every image we boot.
pub const ADMIN_USER: &str = "root";

static DOTTED_QUAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").expect("valid dotted-quad pattern")
});

/// A server's public addresses, one per family.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublicAddresses {
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
}

/// Family of an address, trusting the provider's tag when present.
pub fn address_family(address: &NetworkAddress) -> IpVersion {
    if let Some(version) = address.version {
        return version;
    }
    let family = if DOTTED_QUAD.is_match(&address.addr) {
        IpVersion::V4
    } else {
        IpVersion::V6
    };
    log::warn!("{} has no family tag; treating it as {:?}", address.addr, family);
    family
}

/// First public address of each family.
pub fn public_addresses(server: &ResourceHandle) -> PublicAddresses {
    let mut out = PublicAddresses::default();
    for address in server.addresses_on("public") {
        let slot = match address_family(address) {
            IpVersion::V4 => &mut out.ipv4,
            IpVersion::V6 => &mut out.ipv6,
        };
        if slot.is_none() {
            *slot = Some(address.addr.clone());
        }
    }
    out
}

/// Connection details for one server.
pub fn server_block(server: &ResourceHandle) -> String {
    let addresses = public_addresses(server);
    let mut out = String::new();
    let _ = writeln!(out, "Server  : {}", server.name);
    let _ = writeln!(out, "IP      : {}", addresses.ipv4.as_deref().unwrap_or("-"));
    let _ = writeln!(out, "IPv6    : {}", addresses.ipv6.as_deref().unwrap_or("-"));
    let _ = writeln!(out, "Username: {}", ADMIN_USER);
    let _ = writeln!(
        out,
        "Password: {}",
        server.admin_password.as_deref().unwrap_or("(not available)")
    );
    out
}

/// Full report for a set of servers and an optional load balancer.
pub fn report(servers: &[ResourceHandle], load_balancer: Option<&ResourceHandle>) -> String {
    let mut out = String::new();
    if let Some(lb) = load_balancer {
        let _ = writeln!(
            out,
            "Load balancer: {}  Virtual IP: {}\n",
            lb.name,
            virtual_ip(lb).unwrap_or("-")
        );
    }
    for server in servers {
        out.push_str(&server_block(server));
        out.push('\n');
    }
    out
}

/// The first virtual IP of a load balancer.
pub fn virtual_ip(load_balancer: &ResourceHandle) -> Option<&str> {
    load_balancer.addresses_on("vip").next().map(|a| a.addr.as_str())
}

/// Connection details for a database instance.
pub fn database_line(instance: &ResourceHandle, database: &str, user: &str, password: &str) -> String {
    format!(
        "Hostname: {}  DB: {}    Username/password: {}/{}",
        instance.attribute("hostname").unwrap_or("-"),
        database,
        user,
        password
    )
}
