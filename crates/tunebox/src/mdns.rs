//! mDNS advertisement of the command server.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceInfo};

const SERVICE_TYPE: &str = "_tunebox._tcp.local.";

/// Handle for an active mDNS advertisement.
pub(crate) struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

/// Start advertising `bind` under `name` (default: the host name).
pub(crate) fn spawn_mdns_advertiser(bind: SocketAddr, name: Option<&str>) -> Option<MdnsAdvertiser> {
    let daemon = match ServiceDaemon::new() {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(error = %e, "mdns: daemon start failed");
            return None;
        }
    };
    let host_base = gethostname::gethostname().to_string_lossy().to_string();
    let host = mdns_host_name(&host_base);
    let instance = name.map(str::to_string).unwrap_or_else(|| host_base.clone());
    let ip = if bind.ip().is_unspecified() {
        local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    } else {
        bind.ip()
    };
    let properties = service_properties(&instance, bind.port());

    let info = match ServiceInfo::new(SERVICE_TYPE, &instance, &host, ip, bind.port(), properties) {
        Ok(info) => info,
        Err(e) => {
            tracing::warn!(error = %e, "mdns: bad service info");
            return None;
        }
    };
    let fullname = info.get_fullname().to_string();
    if let Err(e) = daemon.register(info) {
        tracing::warn!(error = %e, "mdns: register failed");
        return None;
    }
    tracing::info!(
        name = %instance,
        addr = %SocketAddr::new(ip, bind.port()),
        "mdns: advertised"
    );
    Some(MdnsAdvertiser { daemon, fullname })
}

impl MdnsAdvertiser {
    /// Unregister and shut the mDNS daemon down.
    pub(crate) fn shutdown(&self) {
        if let Ok(rx) = self.daemon.unregister(&self.fullname) {
            let _ = rx.recv_timeout(Duration::from_secs(1));
        }
        if let Ok(rx) = self.daemon.shutdown() {
            let _ = rx.recv_timeout(Duration::from_secs(1));
        }
    }
}

fn mdns_host_name(base: &str) -> String {
    if base.ends_with(".local.") {
        base.to_string()
    } else {
        format!("{}.local.", base.trim_end_matches('.'))
    }
}

fn service_properties(name: &str, port: u16) -> HashMap<String, String> {
    [
        ("name".to_string(), name.to_string()),
        ("api_port".to_string(), port.to_string()),
        ("protocol".to_string(), "json-lines".to_string()),
    ]
    .into_iter()
    .collect()
}

/// Best-effort local IP for advertisement.
fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    if socket.connect("8.8.8.8:80").is_err() && socket.connect("1.1.1.1:80").is_err() {
        return None;
    }
    socket.local_addr().ok().map(|addr| addr.ip())
}
